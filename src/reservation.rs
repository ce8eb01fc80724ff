//! Reservations: one staff member's exclusive claim on a customer for one product
//!
//! Approval is the only trigger for invalidating other staff's work items. Moving an
//! approved reservation restores the old owner's invalidations before invalidating
//! against the new owner; deleting one only restores.
use tracing::{debug, info, warn};

use super::error::LedgerError;
use super::identity::CustomerRef;
use super::invalidation::{self, InvalidationOutcome, RestoreOutcome};
use super::notify::{self, NotificationKind};
use super::store::{self, LedgerStore, ReservationRepository};
use super::types::{Day, Principal, TimeStamp};
use super::utils::new_record_id;
use super::work_item::WorkItem;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub customer_id: Option<String>,
    #[n(2)]
    pub customer_name: Option<String>, // legacy reservations only carry the name
    #[n(3)]
    pub product_id: String,
    #[n(4)]
    pub owner_staff_id: String,
    #[n(5)]
    pub owner_staff_name: String,
    #[n(6)]
    pub status: ReservationStatus,
    #[n(7)]
    pub is_permanent: bool,
    #[n(8)]
    pub created_at: TimeStamp,
    #[n(9)]
    pub last_activity_date: Option<Day>,
    #[n(10)]
    pub approved_at: Option<TimeStamp>,
    #[n(11)]
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub reservation: Reservation,
    pub invalidation: InvalidationOutcome,
}

#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub reservation: Reservation,
    pub restored: Option<RestoreOutcome>,
    pub invalidation: Option<InvalidationOutcome>,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub reservation: Reservation,
    pub restored: Option<RestoreOutcome>,
}

impl Reservation {
    pub fn new(
        customer: &CustomerRef,
        product_id: &str,
        owner_staff_id: &str,
        owner_staff_name: &str,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_record_id("res")?,
            customer_id: customer.id.clone(),
            customer_name: customer.name.clone(),
            product_id: product_id.to_string(),
            owner_staff_id: owner_staff_id.to_string(),
            owner_staff_name: owner_staff_name.to_string(),
            status: ReservationStatus::Pending,
            is_permanent: false,
            created_at: TimeStamp::now(),
            last_activity_date: None,
            approved_at: None,
            approved_by: None,
        })
    }
    pub fn customer(&self) -> CustomerRef {
        CustomerRef {
            id: self.customer_id.clone(),
            name: self.customer_name.clone(),
        }
    }
    /// Uniqueness key for the single approved slot of (customer, product).
    pub fn approval_key(&self) -> anyhow::Result<String> {
        let customer = self
            .customer()
            .primary_key()
            .ok_or(LedgerError::EmptyIdentity)?;
        Ok(format!("{}/{}", self.product_id, customer))
    }
    /// Date the grace period counts from: last deposit, else approval, else creation.
    pub fn activity_anchor(&self) -> Day {
        self.last_activity_date.unwrap_or_else(|| {
            self.approved_at
                .as_ref()
                .unwrap_or(&self.created_at)
                .day()
        })
    }
    fn state_error(&self, action: &'static str) -> LedgerError {
        LedgerError::InvalidTransition {
            kind: "reservation",
            id: self.id.clone(),
            action,
            state: format!("{:?}", self.status),
        }
    }
}

fn load(store: &impl ReservationRepository, id: &str) -> anyhow::Result<Reservation> {
    Ok(store
        .reservation(id)?
        .ok_or_else(|| LedgerError::not_found("reservation", id))?)
}

fn find_duplicate(
    store: &impl ReservationRepository,
    customer: &CustomerRef,
    product_id: &str,
    except_id: Option<&str>,
) -> anyhow::Result<Option<Reservation>> {
    Ok(store.reservations()?.into_iter().find(|r| {
        r.product_id == product_id
            && Some(r.id.as_str()) != except_id
            && r.customer().overlaps(customer)
    }))
}

pub fn approved_for_product(
    store: &impl ReservationRepository,
    product_id: &str,
) -> anyhow::Result<Vec<Reservation>> {
    Ok(store
        .reservations()?
        .into_iter()
        .filter(|r| r.product_id == product_id && r.status == ReservationStatus::Approved)
        .collect())
}

/// The approved reservation on `item`'s customer held by someone other than `staff_id`.
pub fn held_by_other<'a>(
    reservations: &'a [Reservation],
    item: &WorkItem,
    staff_id: &str,
) -> Option<&'a Reservation> {
    reservations.iter().find(|r| {
        r.status == ReservationStatus::Approved
            && r.product_id == item.product_id
            && r.owner_staff_id != staff_id
            && item.customer.matches(&r.customer())
    })
}

fn notify_invalidated(
    store: &impl LedgerStore,
    reservation: &Reservation,
    outcome: &InvalidationOutcome,
) {
    for affected in &outcome.affected_staff {
        notify::dispatch(
            store,
            &affected.staff_id,
            NotificationKind::RecordInvalidatedReserved,
            &[
                ("customer", reservation.customer().label()),
                ("product_id", reservation.product_id.clone()),
                ("reserved_by", reservation.owner_staff_name.clone()),
                ("count", affected.count.to_string()),
            ],
        );
    }
}

// runs once a reservation has become approved and holds its slot
fn after_approval(
    store: &impl LedgerStore,
    reservation: Reservation,
) -> anyhow::Result<ApprovalOutcome> {
    let invalidation = invalidation::invalidate_others(
        store,
        &reservation.customer(),
        &reservation.product_id,
        &reservation.owner_staff_id,
        &reservation.owner_staff_name,
    )?;
    notify_invalidated(store, &reservation, &invalidation);
    notify::dispatch(
        store,
        &reservation.owner_staff_id,
        NotificationKind::ReservationApproved,
        &[
            ("customer", reservation.customer().label()),
            ("product_id", reservation.product_id.clone()),
        ],
    );

    info!(
        reservation = %reservation.id,
        owner = %reservation.owner_staff_id,
        invalidated = invalidation.count(),
        "reservation approved"
    );
    Ok(ApprovalOutcome {
        reservation,
        invalidation,
    })
}

fn validate_new(
    store: &impl LedgerStore,
    customer: &CustomerRef,
    product_id: &str,
) -> anyhow::Result<()> {
    store::ensure_product(store, product_id)?;
    if customer.primary_key().is_none() {
        return Err(LedgerError::EmptyIdentity.into());
    }
    if let Some(existing) = find_duplicate(store, customer, product_id, None)? {
        return Err(LedgerError::Conflict(format!(
            "customer {} already has a {:?} reservation for product {} held by {}",
            customer.label(),
            existing.status,
            product_id,
            existing.owner_staff_name
        ))
        .into());
    }
    Ok(())
}

/// Staff self-request. Stays pending until an admin approves it.
pub fn request_reservation(
    store: &impl LedgerStore,
    principal: &Principal,
    customer: &CustomerRef,
    product_id: &str,
) -> anyhow::Result<Reservation> {
    store::ensure_staff(store, &principal.staff_id)?;
    validate_new(store, customer, product_id)?;

    let reservation = Reservation::new(
        customer,
        product_id,
        &principal.staff_id,
        &principal.staff_name,
    )?;
    store.put_reservation(&reservation)?;

    info!(
        reservation = %reservation.id,
        owner = %reservation.owner_staff_id,
        product = %product_id,
        "reservation requested"
    );
    Ok(reservation)
}

/// Admin-created reservation, approved from the start.
pub fn create_reservation(
    store: &impl LedgerStore,
    admin: &Principal,
    owner_staff_id: &str,
    customer: &CustomerRef,
    product_id: &str,
    is_permanent: bool,
) -> anyhow::Result<ApprovalOutcome> {
    let owner = store::ensure_staff(store, owner_staff_id)?;
    validate_new(store, customer, product_id)?;

    let mut reservation = Reservation::new(customer, product_id, &owner.id, &owner.name)?;
    reservation.is_permanent = is_permanent;
    reservation.status = ReservationStatus::Approved;
    reservation.approved_at = Some(TimeStamp::now());
    reservation.approved_by = Some(admin.staff_id.clone());

    let key = reservation.approval_key()?;
    if let Some(holder) = store.claim_approval(&key, &reservation.id)? {
        return Err(LedgerError::Conflict(format!(
            "reservation {holder} is already approved for {key}"
        ))
        .into());
    }
    store.put_reservation(&reservation)?;
    after_approval(store, reservation)
}

pub fn approve_reservation(
    store: &impl LedgerStore,
    id: &str,
    approver: &Principal,
) -> anyhow::Result<ApprovalOutcome> {
    let current = load(store, id)?;
    if current.status != ReservationStatus::Pending {
        return Err(current.state_error("approve").into());
    }

    let customer = current.customer();
    let other_approved = approved_for_product(store, &current.product_id)?
        .into_iter()
        .find(|r| r.id != current.id && r.customer().overlaps(&customer));
    if let Some(existing) = other_approved {
        return Err(LedgerError::Conflict(format!(
            "customer {} is already reserved by {} for product {}",
            customer.label(),
            existing.owner_staff_name,
            current.product_id
        ))
        .into());
    }

    let key = current.approval_key()?;
    if let Some(holder) = store.claim_approval(&key, &current.id)? {
        return Err(LedgerError::Conflict(format!(
            "reservation {holder} is already approved for {key}"
        ))
        .into());
    }

    let mut next = current.clone();
    next.status = ReservationStatus::Approved;
    next.approved_at = Some(TimeStamp::now());
    next.approved_by = Some(approver.staff_id.clone());
    if !store.replace_reservation(&current, &next)? {
        // lost a race; only give the slot back if nobody approved this reservation meanwhile
        let approved_elsewhere = store
            .reservation(id)?
            .is_some_and(|r| r.status == ReservationStatus::Approved);
        if !approved_elsewhere {
            store.release_approval(&key, &current.id)?;
        }
        return Err(current.state_error("approve").into());
    }

    after_approval(store, next)
}

/// Decline a pending request. The request is removed and its owner told.
pub fn decline_reservation(
    store: &impl LedgerStore,
    id: &str,
    approver: &Principal,
) -> anyhow::Result<Reservation> {
    let current = load(store, id)?;
    if current.status != ReservationStatus::Pending {
        return Err(current.state_error("decline").into());
    }
    store.remove_reservation(id)?;

    notify::dispatch(
        store,
        &current.owner_staff_id,
        NotificationKind::ReservationDeclined,
        &[
            ("customer", current.customer().label()),
            ("product_id", current.product_id.clone()),
            ("declined_by", approver.staff_name.clone()),
        ],
    );
    info!(reservation = %id, "reservation declined");
    Ok(current)
}

/// Hand a reservation to another staff member.
pub fn move_reservation(
    store: &impl LedgerStore,
    id: &str,
    new_owner_staff_id: &str,
) -> anyhow::Result<MoveOutcome> {
    let current = load(store, id)?;
    let new_owner = store::ensure_staff(store, new_owner_staff_id)?;
    if current.owner_staff_id == new_owner.id {
        return Err(LedgerError::InvalidTransition {
            kind: "reservation",
            id: id.to_string(),
            action: "move",
            state: format!("already owned by {}", new_owner.id),
        }
        .into());
    }

    let mut next = current.clone();
    next.owner_staff_id = new_owner.id.clone();
    next.owner_staff_name = new_owner.name.clone();
    if !store.replace_reservation(&current, &next)? {
        return Err(current.state_error("move").into());
    }

    if current.status == ReservationStatus::Pending {
        info!(reservation = %id, to = %new_owner.id, "pending reservation moved");
        return Ok(MoveOutcome {
            reservation: next,
            restored: None,
            invalidation: None,
        });
    }

    // the previous owner's invalidations must be undone before invalidating for the new one
    let restored = invalidation::restore(
        store,
        &current.owner_staff_id,
        &current.customer(),
        &current.product_id,
    )?;
    let invalidation = invalidation::invalidate_others(
        store,
        &next.customer(),
        &next.product_id,
        &next.owner_staff_id,
        &next.owner_staff_name,
    )?;
    notify_invalidated(store, &next, &invalidation);

    info!(
        reservation = %id,
        from = %current.owner_staff_id,
        to = %next.owner_staff_id,
        restored = restored.restored_count(),
        invalidated = invalidation.count(),
        "reservation moved"
    );
    Ok(MoveOutcome {
        reservation: next,
        restored: Some(restored),
        invalidation: Some(invalidation),
    })
}

/// Delete a reservation. Approved ones give back whatever they invalidated first; the
/// reservation is only removed once every pool restored cleanly, so a failed delete can
/// simply be retried.
pub fn delete_reservation(store: &impl LedgerStore, id: &str) -> anyhow::Result<DeleteOutcome> {
    let current = load(store, id)?;

    let restored = if current.status == ReservationStatus::Approved {
        let restored = invalidation::restore(
            store,
            &current.owner_staff_id,
            &current.customer(),
            &current.product_id,
        )?;
        if !restored.is_complete() {
            let detail = restored
                .pools
                .iter()
                .filter_map(|p| p.error.as_ref().map(|e| format!("{} pool: {e}", p.pool)))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(reservation = %id, %detail, "restore incomplete, reservation kept");
            return Err(LedgerError::Incomplete {
                kind: "reservation",
                id: id.to_string(),
                detail: format!("restore incomplete ({detail})"),
            }
            .into());
        }
        Some(restored)
    } else {
        None
    };

    store
        .remove_reservation(id)?
        .ok_or_else(|| LedgerError::not_found("reservation", id))?;
    if current.status == ReservationStatus::Approved {
        if let Ok(key) = current.approval_key() {
            store.release_approval(&key, &current.id)?;
        }
    }

    info!(
        reservation = %id,
        restored = restored.as_ref().map_or(0, RestoreOutcome::restored_count),
        "reservation deleted"
    );
    Ok(DeleteOutcome {
        reservation: current,
        restored,
    })
}

/// Record a deposit date against the depositing staff's approved reservation, if any.
pub fn touch_activity(
    store: &impl LedgerStore,
    staff_id: &str,
    customer_key: &str,
    product_id: &str,
    date: Day,
) -> anyhow::Result<()> {
    let owned = approved_for_product(store, product_id)?
        .into_iter()
        .filter(|r| r.owner_staff_id == staff_id && r.customer().keys().contains(customer_key));

    for current in owned {
        if current.last_activity_date.is_some_and(|d| d >= date) {
            continue;
        }
        let mut next = current.clone();
        next.last_activity_date = Some(date);
        if !store.replace_reservation(&current, &next)? {
            debug!(reservation = %current.id, "activity update lost a race, skipped");
        }
    }
    Ok(())
}

/// Approved, non-permanent reservations idle for more than `grace_days` as of `today`.
pub fn expired_reservations(
    store: &impl ReservationRepository,
    today: Day,
    grace_days: i64,
) -> anyhow::Result<Vec<Reservation>> {
    Ok(store
        .reservations()?
        .into_iter()
        .filter(|r| r.status == ReservationStatus::Approved && !r.is_permanent)
        .filter(|r| r.activity_anchor().days_until(today) > grace_days)
        .collect())
}

/// Delete every expired reservation with the usual deletion semantics.
pub fn release_expired(
    store: &impl LedgerStore,
    today: Day,
    grace_days: i64,
) -> anyhow::Result<Vec<DeleteOutcome>> {
    let expired = expired_reservations(store, today, grace_days)?;
    let mut released = Vec::with_capacity(expired.len());
    for reservation in expired {
        released.push(delete_reservation(store, &reservation.id)?);
    }
    info!(released = released.len(), %today, "released expired reservations");
    Ok(released)
}
