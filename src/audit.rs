//! Health check and repair for the work-item pools
//!
//! `health_check` only reads. `repair` and `repair_product_mismatches` fix what the
//! check reports and are idempotent: a second run finds nothing to change. Both walk
//! the pools one dataset at a time.
use std::collections::BTreeMap;

use tracing::{info, warn};

use super::store::LedgerStore;
use super::work_item::{Dataset, Pool, WorkItem, WorkItemStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHealth {
    pub pool: Pool,
    pub dataset_id: String,
    pub product_id: String,
    pub total: usize,
    pub missing_metadata: usize,
    pub legacy_invalid: usize,
    pub unknown_status: usize,
    pub orphaned_assignments: usize,
    pub product_mismatches: usize,
}

/// A batch whose cached count disagrees with its live count, or that has no live
/// assignments left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDrift {
    pub pool: Pool,
    pub batch_id: String,
    pub cached: u64,
    pub live: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub datasets: Vec<DatasetHealth>,
    pub batch_drift: Vec<BatchDrift>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub reinterpreted_as_assigned: usize,
    pub demoted_to_available: usize,
    pub metadata_filled: usize,
    pub batches_resynced: usize,
    pub batches_deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfixableItem {
    pub pool: Pool,
    pub dataset_id: String,
    pub item_id: String,
    pub product_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductRepair {
    pub relocated: usize,
    pub unfixable: Vec<UnfixableItem>,
}

impl DatasetHealth {
    fn new(dataset: &Dataset) -> Self {
        Self {
            pool: dataset.pool,
            dataset_id: dataset.id.clone(),
            product_id: dataset.product_id.clone(),
            total: 0,
            missing_metadata: 0,
            legacy_invalid: 0,
            unknown_status: 0,
            orphaned_assignments: 0,
            product_mismatches: 0,
        }
    }
    pub fn defects(&self) -> usize {
        self.missing_metadata
            + self.legacy_invalid
            + self.unknown_status
            + self.orphaned_assignments
            + self.product_mismatches
    }
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.batch_drift.is_empty() && self.datasets.iter().all(|d| d.defects() == 0)
    }
}

impl RepairSummary {
    pub fn changes(&self) -> usize {
        self.reinterpreted_as_assigned
            + self.demoted_to_available
            + self.metadata_filled
            + self.batches_resynced
            + self.batches_deleted
    }
}

fn missing_metadata(item: &WorkItem) -> bool {
    item.product_name.is_none()
        || (item.assigned_staff_id.is_some() && item.assigned_staff_name.is_none())
}

// invalid from before invalidations carried their reason and reserving staff
fn is_legacy_invalid(item: &WorkItem) -> bool {
    item.status == WorkItemStatus::Invalid && item.invalidation.is_none()
}

fn is_orphaned(item: &WorkItem) -> bool {
    item.status == WorkItemStatus::Assigned && item.assigned_staff_id.is_none()
}

fn count_live(live: &mut BTreeMap<String, u64>, item: &WorkItem) {
    if item.status == WorkItemStatus::Assigned {
        if let Some(batch_id) = &item.batch_id {
            *live.entry(batch_id.clone()).or_default() += 1;
        }
    }
}

pub fn health_check(store: &impl LedgerStore) -> anyhow::Result<HealthReport> {
    let mut report = HealthReport::default();

    for pool in Pool::ALL {
        let mut live = BTreeMap::new();
        for dataset in store.datasets(pool)? {
            let mut health = DatasetHealth::new(&dataset);
            for item in store.items_in_dataset(pool, &dataset.id)? {
                health.total += 1;
                health.missing_metadata += usize::from(missing_metadata(&item));
                health.legacy_invalid += usize::from(is_legacy_invalid(&item));
                health.unknown_status +=
                    usize::from(matches!(item.status, WorkItemStatus::Unknown(_)));
                health.orphaned_assignments += usize::from(is_orphaned(&item));
                health.product_mismatches += usize::from(item.product_id != dataset.product_id);
                count_live(&mut live, &item);
            }
            report.datasets.push(health);
        }

        for batch in store.batches(pool)? {
            let count = live.get(&batch.id).copied().unwrap_or(0);
            // an empty batch is deleted by repair even when its counter already says zero
            if count != batch.assigned_count || count == 0 {
                report.batch_drift.push(BatchDrift {
                    pool,
                    batch_id: batch.id,
                    cached: batch.assigned_count,
                    live: count,
                });
            }
        }
    }

    Ok(report)
}

// status fixes only; returns true when the item changed
fn repair_status(item: &mut WorkItem, summary: &mut RepairSummary) -> bool {
    if is_legacy_invalid(item) {
        if item.assigned_staff_id.is_some() {
            item.status = WorkItemStatus::Assigned;
            item.conflict_flag = true;
            summary.reinterpreted_as_assigned += 1;
        } else {
            item.release();
            summary.demoted_to_available += 1;
        }
        return true;
    }
    if matches!(item.status, WorkItemStatus::Unknown(_)) || is_orphaned(item) {
        item.release();
        summary.demoted_to_available += 1;
        return true;
    }
    false
}

fn repair_metadata(
    store: &impl LedgerStore,
    item: &mut WorkItem,
    summary: &mut RepairSummary,
) -> anyhow::Result<bool> {
    let mut changed = false;
    if item.product_name.is_none() {
        if let Some(product) = store.product(&item.product_id)? {
            item.product_name = Some(product.name);
            changed = true;
        }
    }
    if item.assigned_staff_name.is_none() {
        if let Some(staff_id) = &item.assigned_staff_id {
            if let Some(staff) = store.staff(staff_id)? {
                item.assigned_staff_name = Some(staff.name);
                changed = true;
            }
        }
    }
    if changed {
        summary.metadata_filled += 1;
    }
    Ok(changed)
}

pub fn repair(store: &impl LedgerStore) -> anyhow::Result<RepairSummary> {
    let mut summary = RepairSummary::default();

    for pool in Pool::ALL {
        let mut live = BTreeMap::new();
        for dataset in store.datasets(pool)? {
            for mut item in store.items_in_dataset(pool, &dataset.id)? {
                let status_changed = repair_status(&mut item, &mut summary);
                let metadata_changed = repair_metadata(store, &mut item, &mut summary)?;
                if status_changed || metadata_changed {
                    store.put_item(pool, &item)?;
                }
                count_live(&mut live, &item);
            }
        }

        for mut batch in store.batches(pool)? {
            let count = live.get(&batch.id).copied().unwrap_or(0);
            if count == 0 {
                store.remove_batch(&batch.id)?;
                summary.batches_deleted += 1;
            } else if count != batch.assigned_count {
                batch.assigned_count = count;
                store.put_batch(&batch)?;
                summary.batches_resynced += 1;
            }
        }
    }

    info!(
        reinterpreted = summary.reinterpreted_as_assigned,
        demoted = summary.demoted_to_available,
        metadata = summary.metadata_filled,
        batches_resynced = summary.batches_resynced,
        batches_deleted = summary.batches_deleted,
        "repair finished"
    );
    Ok(summary)
}

/// Move items whose product differs from their dataset's into a dataset of the same
/// pool that declares that product. Items with nowhere to go are reported, not dropped.
pub fn repair_product_mismatches(store: &impl LedgerStore) -> anyhow::Result<ProductRepair> {
    let mut result = ProductRepair::default();

    for pool in Pool::ALL {
        let datasets = store.datasets(pool)?;
        let mut home: BTreeMap<&str, &str> = BTreeMap::new();
        for dataset in &datasets {
            home.entry(dataset.product_id.as_str())
                .or_insert(dataset.id.as_str());
        }

        for dataset in &datasets {
            for item in store.items_in_dataset(pool, &dataset.id)? {
                if item.product_id == dataset.product_id {
                    continue;
                }
                match home.get(item.product_id.as_str()) {
                    Some(target) => {
                        store.relocate_item(pool, &item, target)?;
                        result.relocated += 1;
                    }
                    None => {
                        warn!(
                            pool = %pool,
                            item = %item.id,
                            product = %item.product_id,
                            "no dataset declares this product"
                        );
                        result.unfixable.push(UnfixableItem {
                            pool,
                            dataset_id: dataset.id.clone(),
                            item_id: item.id,
                            product_id: item.product_id,
                        });
                    }
                }
            }
        }
    }

    info!(
        relocated = result.relocated,
        unfixable = result.unfixable.len(),
        "product mismatch repair finished"
    );
    Ok(result)
}
