//! Reservation conflict handling across the work-item pools
//!
//! When a reservation is approved, every item for the same customer and product that
//! is assigned to somebody else becomes invalid, carrying who reserved it. Restoring
//! reverses exactly those invalidations, keyed by the reservation owner. Each pool is
//! processed on its own and reports its own outcome, so a failure in one pool never
//! hides the others.
use std::collections::BTreeMap;

use tracing::{info, warn};

use super::error::LedgerError;
use super::identity::CustomerRef;
use super::store::{self, LedgerStore};
use super::work_item::{Pool, WorkItem, WorkItemStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome {
    pub pool: Pool,
    pub count: usize,
    pub error: Option<String>,
}

/// One entry per staff member who lost items, so exactly one notification goes out each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedStaff {
    pub staff_id: String,
    pub staff_name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationOutcome {
    pub pools: Vec<PoolOutcome>,
    pub affected_staff: Vec<AffectedStaff>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub pools: Vec<PoolOutcome>,
}

impl InvalidationOutcome {
    pub fn count(&self) -> usize {
        self.pools.iter().map(|p| p.count).sum()
    }
    /// False when at least one pool failed part-way.
    pub fn is_complete(&self) -> bool {
        self.pools.iter().all(|p| p.error.is_none())
    }
}

impl RestoreOutcome {
    pub fn restored_count(&self) -> usize {
        self.pools.iter().map(|p| p.count).sum()
    }
    pub fn is_complete(&self) -> bool {
        self.pools.iter().all(|p| p.error.is_none())
    }
}

fn check_customer(customer: &CustomerRef) -> anyhow::Result<()> {
    if customer.keys().is_empty() {
        return Err(LedgerError::EmptyIdentity.into());
    }
    Ok(())
}

/// Apply `change` to every item of `pool` selected by `wanted`, stopping at the first
/// write failure. Returns the pool outcome and the items as they were before the change.
fn sweep_pool(
    store: &impl LedgerStore,
    pool: Pool,
    product_id: &str,
    wanted: impl Fn(&WorkItem) -> bool,
    change: impl Fn(&mut WorkItem),
) -> (PoolOutcome, Vec<WorkItem>) {
    let mut outcome = PoolOutcome {
        pool,
        count: 0,
        error: None,
    };
    let items = match store.items_for_product(pool, product_id) {
        Ok(items) => items,
        Err(err) => {
            outcome.error = Some(err.to_string());
            return (outcome, vec![]);
        }
    };

    let mut touched = vec![];
    for item in items.into_iter().filter(|i| wanted(i)) {
        let mut updated = item.clone();
        change(&mut updated);
        if let Err(err) = store.put_item(pool, &updated) {
            warn!(pool = %pool, item = %item.id, error = %err, "work item update failed");
            outcome.error = Some(err.to_string());
            break;
        }
        outcome.count += 1;
        touched.push(item);
    }
    (outcome, touched)
}

/// Invalidate every item for `customer` + `product_id` assigned to anyone other than
/// the reserving staff member. Finding nothing is the normal case.
pub fn invalidate_others(
    store: &impl LedgerStore,
    customer: &CustomerRef,
    product_id: &str,
    reserving_staff_id: &str,
    reserving_staff_name: &str,
) -> anyhow::Result<InvalidationOutcome> {
    store::ensure_product(store, product_id)?;
    check_customer(customer)?;

    let mut outcome = InvalidationOutcome::default();
    let mut affected: BTreeMap<String, (Option<String>, usize)> = BTreeMap::new();

    for pool in Pool::ALL {
        let (pool_outcome, previous) = sweep_pool(
            store,
            pool,
            product_id,
            |item| {
                item.status == WorkItemStatus::Assigned
                    && item.product_id == product_id
                    && item.assigned_staff_id.is_some()
                    && !item.is_assigned_to(reserving_staff_id)
                    && item.customer.matches(customer)
            },
            |item| item.invalidate(reserving_staff_id, reserving_staff_name),
        );
        for item in previous {
            if let Some(owner) = item.assigned_staff_id {
                let entry = affected.entry(owner).or_insert((None, 0));
                entry.0 = entry.0.take().or(item.assigned_staff_name);
                entry.1 += 1;
            }
        }
        outcome.pools.push(pool_outcome);
    }

    for (staff_id, (name, count)) in affected {
        let staff_name = match name {
            Some(name) => name,
            None => store
                .staff(&staff_id)
                .ok()
                .flatten()
                .map(|s| s.name)
                .unwrap_or_else(|| staff_id.clone()),
        };
        outcome.affected_staff.push(AffectedStaff {
            staff_id,
            staff_name,
            count,
        });
    }

    info!(
        customer = %customer.label(),
        product = %product_id,
        reserved_by = %reserving_staff_id,
        invalidated = outcome.count(),
        affected_staff = outcome.affected_staff.len(),
        "invalidated conflicting work items"
    );
    Ok(outcome)
}

/// Undo invalidations caused by `reservation_owner_staff_id`'s reservation on
/// `customer` + `product_id`. Items return to their original assignee.
pub fn restore(
    store: &impl LedgerStore,
    reservation_owner_staff_id: &str,
    customer: &CustomerRef,
    product_id: &str,
) -> anyhow::Result<RestoreOutcome> {
    store::ensure_product(store, product_id)?;
    check_customer(customer)?;

    let mut outcome = RestoreOutcome::default();
    for pool in Pool::ALL {
        let (pool_outcome, _) = sweep_pool(
            store,
            pool,
            product_id,
            |item| {
                item.status == WorkItemStatus::Invalid
                    && item.product_id == product_id
                    && item
                        .invalidation
                        .as_ref()
                        .is_some_and(|inv| inv.reserved_by_staff_id == reservation_owner_staff_id)
                    && item.customer.matches(customer)
            },
            WorkItem::restore,
        );
        outcome.pools.push(pool_outcome);
    }

    info!(
        customer = %customer.label(),
        product = %product_id,
        owner = %reservation_owner_staff_id,
        restored = outcome.restored_count(),
        "restored invalidated work items"
    );
    Ok(outcome)
}
