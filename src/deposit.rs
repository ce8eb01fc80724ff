//! Deposit records and their lifecycle
use tracing::info;

use super::classify;
use super::error::LedgerError;
use super::identity::normalize;
use super::reservation;
use super::store::{self, LedgerStore};
use super::types::{Day, TimeStamp};
use super::utils::new_record_id;

/// Note marker for supplemental ("tambahan") deposits. Matched case-insensitively.
pub const SUPPLEMENTAL_MARKER: &str = "tambahan";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    #[n(0)]
    Approved,
    #[n(1)]
    Pending,
    #[n(2)]
    Declined,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    #[n(0)]
    Ndp,
    #[n(1)]
    Rdp,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub staff_id: String,
    #[n(2)]
    pub customer_id: String,
    #[n(3)]
    pub customer_id_normalized: String,
    #[n(4)]
    pub product_id: String,
    #[n(5)]
    pub record_date: Day,
    #[n(6)]
    pub amount: u64,
    #[n(7)]
    pub note: String,
    #[n(8)]
    pub created_at: TimeStamp,
    // Legacy documents predate approvals and carry neither of the fields below.
    #[n(9)]
    pub approval_status: Option<ApprovalStatus>,
    #[n(10)]
    pub classification: Option<Classification>,
}

/// Input for [`record_deposit`].
#[derive(Debug, Clone)]
pub struct NewDeposit {
    pub staff_id: String,
    pub customer_id: String,
    pub product_id: String,
    pub record_date: Day,
    pub amount: u64,
    pub note: String,
    pub approval: ApprovalStatus,
}

pub fn is_supplemental(note: &str) -> bool {
    note.to_lowercase().contains(SUPPLEMENTAL_MARKER)
}

impl DepositRecord {
    pub fn new(
        staff_id: &str,
        customer_id: &str,
        product_id: &str,
        record_date: Day,
        amount: u64,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_record_id("dep")?,
            staff_id: staff_id.to_string(),
            customer_id: customer_id.to_string(),
            customer_id_normalized: normalize(customer_id),
            product_id: product_id.to_string(),
            record_date,
            amount,
            note: String::new(),
            created_at: TimeStamp::now(),
            approval_status: Some(ApprovalStatus::Approved),
            classification: None,
        })
    }
    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }
    pub fn with_approval(mut self, approval: Option<ApprovalStatus>) -> Self {
        self.approval_status = approval;
        self
    }
    /// Approval state; a document without the field is treated as approved.
    pub fn approval(&self) -> ApprovalStatus {
        self.approval_status.unwrap_or(ApprovalStatus::Approved)
    }
    pub fn is_approved(&self) -> bool {
        self.approval() == ApprovalStatus::Approved
    }
    pub fn is_supplemental(&self) -> bool {
        is_supplemental(&self.note)
    }
    /// Normalised customer key, derived from the raw id when the stored copy is missing.
    pub fn customer_key(&self) -> String {
        if self.customer_id_normalized.is_empty() {
            normalize(&self.customer_id)
        } else {
            self.customer_id_normalized.clone()
        }
    }
}

fn load(store: &impl LedgerStore, id: &str) -> anyhow::Result<DepositRecord> {
    Ok(store
        .deposit(id)?
        .ok_or_else(|| LedgerError::not_found("deposit", id))?)
}

/// Store a new deposit and stamp its classification against the current first-date map.
pub fn record_deposit(store: &impl LedgerStore, input: NewDeposit) -> anyhow::Result<DepositRecord> {
    store::ensure_product(store, &input.product_id)?;
    store::ensure_staff(store, &input.staff_id)?;
    if normalize(&input.customer_id).is_empty() {
        return Err(LedgerError::EmptyIdentity.into());
    }
    if input.amount == 0 {
        return Err(LedgerError::InvalidAmount.into());
    }

    let record = DepositRecord::new(
        &input.staff_id,
        &input.customer_id,
        &input.product_id,
        input.record_date,
        input.amount,
    )?
    .with_note(&input.note)
    .with_approval(Some(input.approval));
    store.put_deposit(&record)?;

    classify::recompute_labels_for_triple(
        store,
        &record.staff_id,
        &record.customer_id,
        &record.product_id,
    )?;
    if record.is_approved() {
        reservation::touch_activity(
            store,
            &record.staff_id,
            &record.customer_key(),
            &record.product_id,
            record.record_date,
        )?;
    }

    let stored = load(store, &record.id)?;
    info!(
        deposit = %stored.id,
        staff = %stored.staff_id,
        product = %stored.product_id,
        date = %stored.record_date,
        classification = ?stored.classification,
        "deposit recorded"
    );
    Ok(stored)
}

fn settle(
    store: &impl LedgerStore,
    id: &str,
    action: &'static str,
    outcome: ApprovalStatus,
) -> anyhow::Result<DepositRecord> {
    let mut record = load(store, id)?;
    if record.approval() != ApprovalStatus::Pending {
        return Err(LedgerError::InvalidTransition {
            kind: "deposit",
            id: id.to_string(),
            action,
            state: format!("{:?}", record.approval()),
        }
        .into());
    }

    record.approval_status = Some(outcome);
    store.put_deposit(&record)?;
    classify::recompute_labels_for_triple(
        store,
        &record.staff_id,
        &record.customer_id,
        &record.product_id,
    )?;
    if outcome == ApprovalStatus::Approved {
        reservation::touch_activity(
            store,
            &record.staff_id,
            &record.customer_key(),
            &record.product_id,
            record.record_date,
        )?;
    }

    info!(deposit = %id, status = ?outcome, "deposit settled");
    load(store, id)
}

pub fn approve_deposit(store: &impl LedgerStore, id: &str) -> anyhow::Result<DepositRecord> {
    settle(store, id, "approve", ApprovalStatus::Approved)
}

pub fn decline_deposit(store: &impl LedgerStore, id: &str) -> anyhow::Result<DepositRecord> {
    settle(store, id, "decline", ApprovalStatus::Declined)
}

/// Remove a deposit; its siblings are relabelled since the first date may have moved.
pub fn delete_deposit(store: &impl LedgerStore, id: &str) -> anyhow::Result<DepositRecord> {
    let record = store
        .remove_deposit(id)?
        .ok_or_else(|| LedgerError::not_found("deposit", id))?;

    let relabelled = classify::recompute_labels_for_triple(
        store,
        &record.staff_id,
        &record.customer_id,
        &record.product_id,
    )?;
    info!(deposit = %id, relabelled, "deposit deleted");
    Ok(record)
}
