//! Work items: assignable customer outreach records living in one of three pools
use std::collections::BTreeMap;
use std::fmt;

use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::error::LedgerError;
use super::identity::CustomerIdentity;
use super::reservation;
use super::store::{self, LedgerStore};
use super::types::{Staff, TimeStamp};
use super::utils::new_record_id;

/// The three structurally identical work-item collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode)]
pub enum Pool {
    #[n(0)]
    Generic,
    #[n(1)]
    Bonanza,
    #[n(2)]
    MemberWithdrawal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItemStatus {
    Available,
    Assigned,
    Invalid,
    Archived,
    /// Any stored value outside the known set. Only the repair pass should see these.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Invalidation {
    #[n(0)]
    pub reason: String,
    #[n(1)]
    pub invalidated_at: TimeStamp,
    #[n(2)]
    pub reserved_by_staff_id: String,
    #[n(3)]
    pub reserved_by_staff_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct WorkItem {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub dataset_id: String,
    #[n(2)]
    pub customer: CustomerIdentity,
    #[n(3)]
    pub product_id: String,
    #[n(4)]
    pub product_name: Option<String>, // denormalised from the product registry
    #[n(5)]
    pub status: WorkItemStatus,
    #[n(6)]
    pub assigned_staff_id: Option<String>,
    #[n(7)]
    pub assigned_staff_name: Option<String>, // denormalised from the staff registry
    #[n(8)]
    pub batch_id: Option<String>,
    #[n(9)]
    pub invalidation: Option<Invalidation>,
    #[n(10)]
    pub conflict_flag: bool,
    #[n(11)]
    pub assigned_at: Option<TimeStamp>,
}

/// One uploaded customer list. It lives in a single pool and declares a single product.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Dataset {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub pool: Pool,
    #[n(2)]
    pub product_id: String,
    #[n(3)]
    pub name: String,
}

/// A group of items handed to one staff member by a single random assignment.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Batch {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub pool: Pool,
    #[n(2)]
    pub dataset_id: String,
    #[n(3)]
    pub staff_id: String,
    #[n(4)]
    pub product_id: String,
    #[n(5)]
    pub assigned_count: u64, // cached; the auditor compares it with a live count
    #[n(6)]
    pub created_at: TimeStamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

impl Pool {
    pub const ALL: [Pool; 3] = [Pool::Generic, Pool::Bonanza, Pool::MemberWithdrawal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Generic => "generic",
            Pool::Bonanza => "bonanza",
            Pool::MemberWithdrawal => "member_withdrawal",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkItemStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "available" => Self::Available,
            "assigned" => Self::Assigned,
            "invalid" => Self::Invalid,
            "archived" => Self::Archived,
            other => Self::Unknown(other.to_string()),
        }
    }
    pub fn as_str(&self) -> &str {
        match self {
            Self::Available => "available",
            Self::Assigned => "assigned",
            Self::Invalid => "invalid",
            Self::Archived => "archived",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// stored as text so that unrecognised legacy values survive a round trip
impl<C> minicbor::Encode<C> for WorkItemStatus {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(self.as_str())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for WorkItemStatus {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(WorkItemStatus::parse(d.str()?))
    }
}

impl Dataset {
    pub fn new(pool: Pool, product_id: &str, name: &str) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_record_id("ds")?,
            pool,
            product_id: product_id.to_string(),
            name: name.to_string(),
        })
    }
}

impl WorkItem {
    pub fn new(dataset: &Dataset, customer: CustomerIdentity) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_record_id("item")?,
            dataset_id: dataset.id.clone(),
            customer,
            product_id: dataset.product_id.clone(),
            product_name: None,
            status: WorkItemStatus::Available,
            assigned_staff_id: None,
            assigned_staff_name: None,
            batch_id: None,
            invalidation: None,
            conflict_flag: false,
            assigned_at: None,
        })
    }
    pub fn is_assigned_to(&self, staff_id: &str) -> bool {
        self.assigned_staff_id.as_deref() == Some(staff_id)
    }
    pub fn assign(&mut self, staff: &Staff, batch_id: Option<&str>) {
        self.status = WorkItemStatus::Assigned;
        self.assigned_staff_id = Some(staff.id.clone());
        self.assigned_staff_name = Some(staff.name.clone());
        self.batch_id = batch_id.map(str::to_string);
        self.assigned_at = Some(TimeStamp::now());
    }
    pub fn invalidate(&mut self, reserved_by_staff_id: &str, reserved_by_staff_name: &str) {
        self.status = WorkItemStatus::Invalid;
        self.invalidation = Some(Invalidation {
            reason: format!("reserved by {reserved_by_staff_name}"),
            invalidated_at: TimeStamp::now(),
            reserved_by_staff_id: reserved_by_staff_id.to_string(),
            reserved_by_staff_name: reserved_by_staff_name.to_string(),
        });
    }
    /// Back to its original assignee. The conflict flag keeps the history visible.
    pub fn restore(&mut self) {
        self.status = WorkItemStatus::Assigned;
        self.invalidation = None;
        self.conflict_flag = true;
    }
    pub fn release(&mut self) {
        self.status = WorkItemStatus::Available;
        self.assigned_staff_id = None;
        self.assigned_staff_name = None;
        self.batch_id = None;
        self.invalidation = None;
        self.assigned_at = None;
    }
}

/// Turn parsed upload rows into available items. Rows without a usable identifier are skipped.
pub fn import_rows(
    store: &impl LedgerStore,
    dataset_id: &str,
    rows: Vec<BTreeMap<String, String>>,
) -> anyhow::Result<ImportSummary> {
    let dataset = store::ensure_dataset(store, dataset_id)?;
    let product = store::ensure_product(store, &dataset.product_id)?;

    let mut summary = ImportSummary::default();
    for row in rows {
        let customer = CustomerIdentity::from_row(row);
        if customer.primary_key().is_none() {
            summary.skipped += 1;
            continue;
        }
        let mut item = WorkItem::new(&dataset, customer)?;
        item.product_name = Some(product.name.clone());
        store.put_item(dataset.pool, &item)?;
        summary.imported += 1;
    }

    info!(
        dataset = %dataset.id,
        pool = %dataset.pool,
        imported = summary.imported,
        skipped = summary.skipped,
        "imported work items"
    );
    Ok(summary)
}

/// Manually hand one available item to `staff_id`.
pub fn assign_item(
    store: &impl LedgerStore,
    dataset_id: &str,
    item_id: &str,
    staff_id: &str,
) -> anyhow::Result<WorkItem> {
    let dataset = store::ensure_dataset(store, dataset_id)?;
    let staff = store::ensure_staff(store, staff_id)?;
    let mut item = store
        .item(dataset.pool, dataset_id, item_id)?
        .ok_or_else(|| LedgerError::not_found("work item", item_id))?;

    if item.status != WorkItemStatus::Available {
        return Err(LedgerError::InvalidTransition {
            kind: "work item",
            id: item.id.clone(),
            action: "assign",
            state: item.status.to_string(),
        }
        .into());
    }

    let reservations = reservation::approved_for_product(store, &item.product_id)?;
    if let Some(holder) = reservation::held_by_other(&reservations, &item, &staff.id) {
        return Err(LedgerError::Conflict(format!(
            "customer is reserved by {} for product {}",
            holder.owner_staff_name, item.product_id
        ))
        .into());
    }

    item.assign(&staff, None);
    store.put_item(dataset.pool, &item)?;
    debug!(item = %item.id, staff = %staff.id, "assigned work item");
    Ok(item)
}

/// Randomly pick up to `count` available, unreserved items and hand them to `staff_id`
/// as one batch. Returns `None` when nothing could be assigned.
pub fn assign_random(
    store: &impl LedgerStore,
    dataset_id: &str,
    staff_id: &str,
    count: usize,
) -> anyhow::Result<Option<Batch>> {
    let dataset = store::ensure_dataset(store, dataset_id)?;
    let staff = store::ensure_staff(store, staff_id)?;
    let reservations = reservation::approved_for_product(store, &dataset.product_id)?;

    let candidates: Vec<WorkItem> = store
        .items_in_dataset(dataset.pool, &dataset.id)?
        .into_iter()
        .filter(|item| item.status == WorkItemStatus::Available)
        .filter(|item| reservation::held_by_other(&reservations, item, &staff.id).is_none())
        .collect();

    let picked: Vec<&WorkItem> = candidates
        .choose_multiple(&mut rand::thread_rng(), count)
        .collect();
    if picked.is_empty() {
        return Ok(None);
    }

    let batch = Batch {
        id: new_record_id("batch")?,
        pool: dataset.pool,
        dataset_id: dataset.id.clone(),
        staff_id: staff.id.clone(),
        product_id: dataset.product_id.clone(),
        assigned_count: picked.len() as u64,
        created_at: TimeStamp::now(),
    };
    for item in picked {
        let mut item = item.clone();
        item.assign(&staff, Some(&batch.id));
        store.put_item(dataset.pool, &item)?;
    }
    store.put_batch(&batch)?;

    info!(
        batch = %batch.id,
        staff = %staff.id,
        assigned = batch.assigned_count,
        "random assignment"
    );
    Ok(Some(batch))
}

pub fn archive_item(
    store: &impl LedgerStore,
    dataset_id: &str,
    item_id: &str,
) -> anyhow::Result<WorkItem> {
    let dataset = store::ensure_dataset(store, dataset_id)?;
    let mut item = store
        .item(dataset.pool, dataset_id, item_id)?
        .ok_or_else(|| LedgerError::not_found("work item", item_id))?;

    item.status = WorkItemStatus::Archived;
    store.put_item(dataset.pool, &item)?;
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_survives_encoding() {
        let status = WorkItemStatus::parse("pending_review");
        let encoded = minicbor::to_vec(&status).unwrap();
        let decoded: WorkItemStatus = minicbor::decode(&encoded).unwrap();

        assert_eq!(decoded, WorkItemStatus::Unknown("pending_review".into()));
    }

    #[test]
    fn invalidate_then_restore_keeps_assignee() {
        let dataset = Dataset::new(Pool::Generic, "alpha", "jan").unwrap();
        let mut item = WorkItem::new(
            &dataset,
            CustomerIdentity::default().with_field("username", "cust1"),
        )
        .unwrap();
        item.assign(&Staff::new("s2", "Budi"), None);

        item.invalidate("s1", "Sari");
        let invalidation = item.invalidation.clone().unwrap();
        assert_eq!(item.status, WorkItemStatus::Invalid);
        assert_eq!(invalidation.reason, "reserved by Sari");
        assert_eq!(invalidation.reserved_by_staff_id, "s1");

        item.restore();
        assert_eq!(item.status, WorkItemStatus::Assigned);
        assert!(item.invalidation.is_none());
        assert!(item.conflict_flag);
        assert!(item.is_assigned_to("s2"));
    }
}
