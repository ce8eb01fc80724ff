//! Property-based tests for NDP/RDP classification and the reporting views
//!
//! Deposits are generated over a small pool of staff, customers and products so that
//! triples collide often, including customer ids that differ only in case or spacing.

use std::collections::BTreeMap;

use deposit_ledger::{
    SledStore,
    classify::{Triple, build_first_date_map, classify},
    deposit::{self, ApprovalStatus, Classification, NewDeposit},
    report::{self, DateRange, Tally},
    store::{DepositRepository, Registry},
    types::{Day, Product, Staff},
};
use proptest::prelude::*;

const STAFF: [&str; 3] = ["s1", "s2", "s3"];
const PRODUCTS: [&str; 2] = ["alpha", "beta"];
// spellings that normalise onto two distinct customers
const CUSTOMERS: [&str; 4] = ["CUST-1", " cust-1 ", "Cust-2", "cust-2!"];

#[derive(Debug, Clone)]
struct Draft {
    staff: usize,
    customer: usize,
    product: usize,
    day: u32,
    amount: u64,
    supplemental: bool,
    approval: ApprovalStatus,
}

fn approval_strategy() -> impl Strategy<Value = ApprovalStatus> {
    prop_oneof![
        6 => Just(ApprovalStatus::Approved),
        1 => Just(ApprovalStatus::Pending),
        1 => Just(ApprovalStatus::Declined),
    ]
}

fn draft_strategy() -> impl Strategy<Value = Draft> {
    (
        0..STAFF.len(),
        0..CUSTOMERS.len(),
        0..PRODUCTS.len(),
        1u32..=20,
        1u64..=1_000_000,
        prop::bool::weighted(0.15),
        approval_strategy(),
    )
        .prop_map(
            |(staff, customer, product, day, amount, supplemental, approval)| Draft {
                staff,
                customer,
                product,
                day,
                amount,
                supplemental,
                approval,
            },
        )
}

fn jan(day: u32) -> Day {
    Day::parse(&format!("2025-01-{day:02}")).unwrap()
}

fn whole_month() -> DateRange {
    DateRange::new(jan(1), jan(31))
}

fn seeded_store() -> SledStore {
    let store = SledStore::temporary().unwrap();
    for product in PRODUCTS {
        store.put_product(&Product::new(product, product)).unwrap();
    }
    for staff in STAFF {
        store.put_staff(&Staff::new(staff, staff)).unwrap();
    }
    store
}

fn record_all(store: &SledStore, drafts: &[Draft]) {
    for draft in drafts {
        deposit::record_deposit(
            store,
            NewDeposit {
                staff_id: STAFF[draft.staff].to_string(),
                customer_id: CUSTOMERS[draft.customer].to_string(),
                product_id: PRODUCTS[draft.product].to_string(),
                record_date: jan(draft.day),
                amount: draft.amount,
                note: if draft.supplemental {
                    "setoran Tambahan".to_string()
                } else {
                    String::new()
                },
                approval: draft.approval,
            },
        )
        .unwrap();
    }
}

fn sum<'a>(tallies: impl IntoIterator<Item = &'a Tally>) -> Tally {
    let mut total = Tally::default();
    for tally in tallies {
        total.merge(tally);
    }
    total
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every view partitions the same labelled records, so their totals agree.
    #[test]
    fn views_agree_on_totals(drafts in prop::collection::vec(draft_strategy(), 1..30)) {
        let store = seeded_store();
        record_all(&store, &drafts);
        let range = whole_month();

        let totals = report::totals(&store, range).unwrap();
        let daily = report::daily_summary(&store, range).unwrap();
        let leaderboard = report::staff_leaderboard(&store, range).unwrap();
        let products = report::product_breakdown(&store, range).unwrap();

        prop_assert_eq!(sum(daily.values()), totals);
        prop_assert_eq!(sum(leaderboard.iter().map(|s| &s.tally)), totals);
        prop_assert_eq!(sum(products.values()), totals);

        let mut per_staff = Tally::default();
        for staff in STAFF {
            let days = report::staff_daily(&store, staff, range).unwrap();
            per_staff.merge(&sum(days.values()));
        }
        prop_assert_eq!(per_staff, totals);

        let mut per_product = Tally::default();
        for product in PRODUCTS {
            let days = report::product_daily(&store, product, range).unwrap();
            per_product.merge(&sum(days.values()));
        }
        prop_assert_eq!(per_product, totals);
    }

    /// Stored labels always equal a fresh classification against full history.
    #[test]
    fn cached_labels_match_fresh_classification(
        drafts in prop::collection::vec(draft_strategy(), 1..30)
    ) {
        let store = seeded_store();
        record_all(&store, &drafts);

        let map = build_first_date_map(&store, None).unwrap();
        for record in store.deposits(None).unwrap() {
            prop_assert_eq!(record.classification, Some(classify(&record, &map)));
            if record.is_supplemental() {
                prop_assert_eq!(record.classification, Some(Classification::Rdp));
            }
        }
    }

    /// Each triple with a qualifying deposit contributes exactly one NDP.
    #[test]
    fn one_ndp_per_triple(drafts in prop::collection::vec(draft_strategy(), 1..30)) {
        let store = seeded_store();
        record_all(&store, &drafts);

        let map = build_first_date_map(&store, None).unwrap();
        let totals = report::totals(&store, whole_month()).unwrap();
        prop_assert_eq!(totals.ndp, map.len() as u64);

        // and that NDP sits on the earliest qualifying date
        let mut earliest: BTreeMap<Triple, Day> = BTreeMap::new();
        for draft in &drafts {
            if draft.supplemental || draft.approval != ApprovalStatus::Approved {
                continue;
            }
            let triple = Triple::new(STAFF[draft.staff], CUSTOMERS[draft.customer], PRODUCTS[draft.product]);
            let day = jan(draft.day);
            earliest
                .entry(triple)
                .and_modify(|d| *d = (*d).min(day))
                .or_insert(day);
        }
        prop_assert_eq!(earliest.len(), map.len());
        for (triple, day) in &earliest {
            prop_assert_eq!(map.first_date(triple), Some(*day));
        }
    }

    /// Deleting deposits keeps the cached labels consistent with what remains.
    #[test]
    fn deletions_relabel_the_triple(
        drafts in prop::collection::vec(draft_strategy(), 2..20),
        delete_every in 2usize..4,
    ) {
        let store = seeded_store();
        record_all(&store, &drafts);

        let ids: Vec<String> = store.deposits(None).unwrap().into_iter().map(|r| r.id).collect();
        for id in ids.iter().step_by(delete_every) {
            deposit::delete_deposit(&store, id).unwrap();
        }

        let map = build_first_date_map(&store, None).unwrap();
        for record in store.deposits(None).unwrap() {
            prop_assert_eq!(record.classification, Some(classify(&record, &map)));
        }
    }
}
