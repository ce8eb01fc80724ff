//! Reporting views: daily summary, staff leaderboard, product breakdown
//!
//! Every view labels records through [`classify`] against a freshly built
//! [`build_first_date_map`], never through the cached label, so all views agree for
//! the same range. The map always covers full history: a range must not turn a
//! repeat deposit into a new one just because the first deposit predates it.
//!
//! NDP is counted once per (staff, customer, product) triple, however many records
//! share the first date; amounts still sum over every record. RDP counts records.
use std::collections::{BTreeMap, BTreeSet};

use super::classify::{Triple, build_first_date_map, classify};
use super::deposit::{Classification, DepositRecord};
use super::store::DepositRepository;
use super::types::Day;

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: Day,
    pub to: Day,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub ndp: u64,
    pub rdp: u64,
    pub ndp_amount: u64,
    pub rdp_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffStanding {
    pub staff_id: String,
    pub tally: Tally,
}

impl DateRange {
    pub fn new(from: Day, to: Day) -> Self {
        Self { from, to }
    }
    pub fn day(day: Day) -> Self {
        Self { from: day, to: day }
    }
    pub fn contains(&self, day: Day) -> bool {
        self.from <= day && day <= self.to
    }
}

impl Tally {
    pub fn merge(&mut self, other: &Tally) {
        self.ndp += other.ndp;
        self.rdp += other.rdp;
        self.ndp_amount += other.ndp_amount;
        self.rdp_amount += other.rdp_amount;
    }
    pub fn deposits(&self) -> u64 {
        self.ndp + self.rdp
    }
}

// a tally plus the NDP triples already counted into it
#[derive(Default)]
struct Accumulator {
    tally: Tally,
    seen: BTreeSet<Triple>,
}

impl Accumulator {
    fn add(&mut self, record: &DepositRecord, label: Classification) {
        match label {
            Classification::Ndp => {
                if self.seen.insert(Triple::of(record)) {
                    self.tally.ndp += 1;
                }
                self.tally.ndp_amount += record.amount;
            }
            Classification::Rdp => {
                self.tally.rdp += 1;
                self.tally.rdp_amount += record.amount;
            }
        }
    }
}

// approved records inside the range, each with its label
fn labelled(
    store: &impl DepositRepository,
    range: DateRange,
    product_id: Option<&str>,
) -> anyhow::Result<Vec<(DepositRecord, Classification)>> {
    let map = build_first_date_map(store, product_id)?;
    Ok(store
        .deposits(product_id)?
        .into_iter()
        .filter(|r| r.is_approved() && range.contains(r.record_date))
        .map(|r| {
            let label = classify(&r, &map);
            (r, label)
        })
        .collect())
}

fn grouped<K: Ord>(
    rows: Vec<(DepositRecord, Classification)>,
    key: impl Fn(&DepositRecord) -> K,
) -> BTreeMap<K, Tally> {
    let mut out: BTreeMap<K, Accumulator> = BTreeMap::new();
    for (record, label) in rows {
        out.entry(key(&record)).or_default().add(&record, label);
    }
    out.into_iter().map(|(k, acc)| (k, acc.tally)).collect()
}

pub fn daily_summary(
    store: &impl DepositRepository,
    range: DateRange,
) -> anyhow::Result<BTreeMap<Day, Tally>> {
    Ok(grouped(labelled(store, range, None)?, |r| r.record_date))
}

/// Staff ranked by NDP count, then NDP amount, then id.
pub fn staff_leaderboard(
    store: &impl DepositRepository,
    range: DateRange,
) -> anyhow::Result<Vec<StaffStanding>> {
    let mut standings: Vec<StaffStanding> =
        grouped(labelled(store, range, None)?, |r| r.staff_id.clone())
            .into_iter()
            .map(|(staff_id, tally)| StaffStanding { staff_id, tally })
            .collect();
    standings.sort_by(|a, b| {
        b.tally
            .ndp
            .cmp(&a.tally.ndp)
            .then(b.tally.ndp_amount.cmp(&a.tally.ndp_amount))
            .then(a.staff_id.cmp(&b.staff_id))
    });
    Ok(standings)
}

pub fn product_breakdown(
    store: &impl DepositRepository,
    range: DateRange,
) -> anyhow::Result<BTreeMap<String, Tally>> {
    Ok(grouped(labelled(store, range, None)?, |r| r.product_id.clone()))
}

/// Per-day tallies for one staff member.
pub fn staff_daily(
    store: &impl DepositRepository,
    staff_id: &str,
    range: DateRange,
) -> anyhow::Result<BTreeMap<Day, Tally>> {
    let rows = labelled(store, range, None)?
        .into_iter()
        .filter(|(r, _)| r.staff_id == staff_id)
        .collect();
    Ok(grouped(rows, |r| r.record_date))
}

/// Per-day tallies for one product, using a product-scoped map.
pub fn product_daily(
    store: &impl DepositRepository,
    product_id: &str,
    range: DateRange,
) -> anyhow::Result<BTreeMap<Day, Tally>> {
    Ok(grouped(labelled(store, range, Some(product_id))?, |r| {
        r.record_date
    }))
}

pub fn totals(store: &impl DepositRepository, range: DateRange) -> anyhow::Result<Tally> {
    let mut total = Accumulator::default();
    for (record, label) in labelled(store, range, None)? {
        total.add(&record, label);
    }
    Ok(total.tally)
}
