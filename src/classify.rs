//! NDP/RDP classification
//!
//! A deposit is NDP ("new") when it falls on the earliest qualifying date of its
//! (staff, customer, product) triple, and RDP ("repeat") otherwise. The earliest
//! date comes from [`build_first_date_map`], which is the only definition every
//! report uses. Stored labels on [`DepositRecord`] are a cache of [`classify`]
//! and are rewritten by [`recompute_labels_for_triple`].
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::debug;

use super::deposit::{Classification, DepositRecord};
use super::identity::normalize;
use super::store::DepositRepository;
use super::types::Day;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    pub staff_id: String,
    pub customer_key: String,
    pub product_id: String,
}

/// (staff, normalised customer, product) -> earliest qualifying deposit date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstDateMap(BTreeMap<Triple, Day>);

impl Triple {
    pub fn new(staff_id: &str, customer_id: &str, product_id: &str) -> Self {
        Self {
            staff_id: staff_id.to_string(),
            customer_key: normalize(customer_id),
            product_id: product_id.to_string(),
        }
    }
    pub fn of(record: &DepositRecord) -> Self {
        Self {
            staff_id: record.staff_id.clone(),
            customer_key: record.customer_key(),
            product_id: record.product_id.clone(),
        }
    }
}

impl FirstDateMap {
    /// Group qualifying records by triple and keep the minimum date.
    ///
    /// Only approved, non-supplemental records qualify. Raw ids that normalise to
    /// the same key collapse into one triple, and the earliest date across them wins.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DepositRecord>) -> Self {
        let mut map = BTreeMap::new();
        for record in records {
            if !record.is_approved() || record.is_supplemental() {
                continue;
            }
            let triple = Triple::of(record);
            if triple.customer_key.is_empty() {
                continue;
            }
            match map.entry(triple) {
                Entry::Vacant(slot) => {
                    slot.insert(record.record_date);
                }
                Entry::Occupied(mut slot) => {
                    if record.record_date < *slot.get() {
                        slot.insert(record.record_date);
                    }
                }
            }
        }
        Self(map)
    }
    pub fn first_date(&self, triple: &Triple) -> Option<Day> {
        self.0.get(triple).copied()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&Triple, &Day)> {
        self.0.iter()
    }
}

/// Build the first-date map from the store, optionally for one product only.
pub fn build_first_date_map(
    store: &impl DepositRepository,
    product_filter: Option<&str>,
) -> anyhow::Result<FirstDateMap> {
    let records = store.deposits(product_filter)?;
    Ok(FirstDateMap::from_records(&records))
}

pub fn classify(record: &DepositRecord, map: &FirstDateMap) -> Classification {
    if record.is_supplemental() {
        return Classification::Rdp;
    }
    match map.first_date(&Triple::of(record)) {
        Some(first) if first == record.record_date => Classification::Ndp,
        _ => Classification::Rdp,
    }
}

/// Re-stamp every record of one triple. Returns how many stored labels changed.
///
/// Call after anything that can move the first date: insert, delete, approve,
/// decline or restore of a record in the triple.
pub fn recompute_labels_for_triple(
    store: &impl DepositRepository,
    staff_id: &str,
    customer_id: &str,
    product_id: &str,
) -> anyhow::Result<usize> {
    let triple = Triple::new(staff_id, customer_id, product_id);
    let mut records = store.deposits_for_triple(&triple)?;
    records.sort_by(|a, b| a.record_date.cmp(&b.record_date));

    let map = FirstDateMap::from_records(&records);
    let mut changed = 0;
    for mut record in records {
        let label = classify(&record, &map);
        if record.classification != Some(label) {
            record.classification = Some(label);
            store.put_deposit(&record)?;
            changed += 1;
        }
    }

    debug!(
        staff = %triple.staff_id,
        customer = %triple.customer_key,
        product = %triple.product_id,
        changed,
        "relabelled triple"
    );
    Ok(changed)
}
