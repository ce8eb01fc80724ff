//! Repository traits and their sled-backed implementation
//!
//! Every operation in the crate is a free function over one of these traits, so the
//! HTTP layer, scheduled jobs and repair tooling all run the same code.
use std::sync::Arc;

use sled::{Batch, Db, IVec, Tree};
use tracing::info;

use super::classify::Triple;
use super::deposit::DepositRecord;
use super::error::LedgerError;
use super::notify::{Notification, NotificationSink};
use super::reservation::Reservation;
use super::types::{Product, Staff};
use super::work_item::{self, Dataset, Pool, WorkItem};

pub trait DepositRepository {
    fn put_deposit(&self, record: &DepositRecord) -> anyhow::Result<()>;
    fn deposit(&self, id: &str) -> anyhow::Result<Option<DepositRecord>>;
    fn remove_deposit(&self, id: &str) -> anyhow::Result<Option<DepositRecord>>;
    /// Records for `product_id`, or every record when `None`.
    fn deposits(&self, product_id: Option<&str>) -> anyhow::Result<Vec<DepositRecord>>;
    /// Records of one (staff, customer, product) triple.
    fn deposits_for_triple(&self, triple: &Triple) -> anyhow::Result<Vec<DepositRecord>>;
}

/// One interface for all three pools; the pool is an argument, never a separate type.
pub trait WorkItemRepository {
    fn put_item(&self, pool: Pool, item: &WorkItem) -> anyhow::Result<()>;
    fn item(&self, pool: Pool, dataset_id: &str, item_id: &str)
    -> anyhow::Result<Option<WorkItem>>;
    fn items_in_dataset(&self, pool: Pool, dataset_id: &str) -> anyhow::Result<Vec<WorkItem>>;
    fn items_for_product(&self, pool: Pool, product_id: &str) -> anyhow::Result<Vec<WorkItem>>;
    /// Move an item under another dataset of the same pool, atomically.
    fn relocate_item(
        &self,
        pool: Pool,
        item: &WorkItem,
        to_dataset_id: &str,
    ) -> anyhow::Result<WorkItem>;
}

pub trait ReservationRepository {
    fn put_reservation(&self, reservation: &Reservation) -> anyhow::Result<()>;
    fn reservation(&self, id: &str) -> anyhow::Result<Option<Reservation>>;
    fn remove_reservation(&self, id: &str) -> anyhow::Result<Option<Reservation>>;
    fn reservations(&self) -> anyhow::Result<Vec<Reservation>>;
    /// Write `next` only if the stored reservation still equals `current`.
    fn replace_reservation(&self, current: &Reservation, next: &Reservation)
    -> anyhow::Result<bool>;
    /// Claim the single approved slot for `key`. Returns the holding reservation id
    /// when another reservation already owns it.
    fn claim_approval(&self, key: &str, reservation_id: &str) -> anyhow::Result<Option<String>>;
    fn release_approval(&self, key: &str, reservation_id: &str) -> anyhow::Result<()>;
}

pub trait Registry {
    fn put_product(&self, product: &Product) -> anyhow::Result<()>;
    fn product(&self, id: &str) -> anyhow::Result<Option<Product>>;
    fn put_staff(&self, staff: &Staff) -> anyhow::Result<()>;
    fn staff(&self, id: &str) -> anyhow::Result<Option<Staff>>;
    fn put_dataset(&self, dataset: &Dataset) -> anyhow::Result<()>;
    fn dataset(&self, id: &str) -> anyhow::Result<Option<Dataset>>;
    fn datasets(&self, pool: Pool) -> anyhow::Result<Vec<Dataset>>;
}

pub trait BatchRepository {
    fn put_batch(&self, batch: &work_item::Batch) -> anyhow::Result<()>;
    fn batch(&self, id: &str) -> anyhow::Result<Option<work_item::Batch>>;
    fn batches(&self, pool: Pool) -> anyhow::Result<Vec<work_item::Batch>>;
    fn remove_batch(&self, id: &str) -> anyhow::Result<()>;
}

pub trait LedgerStore:
    DepositRepository
    + WorkItemRepository
    + ReservationRepository
    + Registry
    + BatchRepository
    + NotificationSink
{
}

impl<T> LedgerStore for T where
    T: DepositRepository
        + WorkItemRepository
        + ReservationRepository
        + Registry
        + BatchRepository
        + NotificationSink
{
}

pub fn ensure_product(store: &impl Registry, id: &str) -> anyhow::Result<Product> {
    Ok(store
        .product(id)?
        .ok_or_else(|| LedgerError::UnknownProduct(id.to_string()))?)
}

pub fn ensure_staff(store: &impl Registry, id: &str) -> anyhow::Result<Staff> {
    Ok(store
        .staff(id)?
        .ok_or_else(|| LedgerError::not_found("staff", id))?)
}

pub fn ensure_dataset(store: &impl Registry, id: &str) -> anyhow::Result<Dataset> {
    Ok(store
        .dataset(id)?
        .ok_or_else(|| LedgerError::not_found("dataset", id))?)
}

pub struct SledStore {
    instance: Arc<Db>,
    deposits: Tree,
    deposit_index: Tree,
    reservations: Tree,
    approvals: Tree,
    products: Tree,
    staff: Tree,
    datasets: Tree,
    batches: Tree,
    notifications: Tree,
    generic: Tree,
    bonanza: Tree,
    member_withdrawal: Tree,
    item_index: Tree,
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> anyhow::Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> anyhow::Result<T> {
    Ok(minicbor::decode(bytes)?)
}

fn get<T: for<'b> minicbor::Decode<'b, ()>>(tree: &Tree, key: &str) -> anyhow::Result<Option<T>> {
    tree.get(key.as_bytes())?.map(|v| decode(&v)).transpose()
}

fn put<T: minicbor::Encode<()>>(tree: &Tree, key: &str, value: &T) -> anyhow::Result<()> {
    tree.insert(key.as_bytes(), encode(value)?)?;
    Ok(())
}

fn take<T: for<'b> minicbor::Decode<'b, ()>>(tree: &Tree, key: &str) -> anyhow::Result<Option<T>> {
    tree.remove(key.as_bytes())?.map(|v| decode(&v)).transpose()
}

fn collect<T: for<'b> minicbor::Decode<'b, ()>>(
    entries: impl Iterator<Item = sled::Result<(IVec, IVec)>>,
) -> anyhow::Result<Vec<T>> {
    entries
        .map(|entry| {
            let (_, value) = entry?;
            decode(&value)
        })
        .collect()
}

// items are keyed under their dataset so a dataset can be scanned on its own
fn item_key(dataset_id: &str, item_id: &str) -> String {
    format!("{dataset_id}/{item_id}")
}

// Index entries map a scan-friendly key to the primary key of the indexed document.
// Deposits: "<product>/<staff>/<customer key>/<id>". Items: "<pool>/<product>/<primary key>".
fn triple_prefix(triple: &Triple) -> String {
    format!(
        "{}/{}/{}/",
        triple.product_id, triple.staff_id, triple.customer_key
    )
}

fn deposit_index_key(record: &DepositRecord) -> String {
    format!("{}{}", triple_prefix(&Triple::of(record)), record.id)
}

fn item_index_key(pool: Pool, item: &WorkItem) -> String {
    format!(
        "{pool}/{}/{}",
        item.product_id,
        item_key(&item.dataset_id, &item.id)
    )
}

// follow every index entry under `prefix` to its document; dangling entries are skipped
fn indexed<T: for<'b> minicbor::Decode<'b, ()>>(
    index: &Tree,
    primary: &Tree,
    prefix: &str,
) -> anyhow::Result<Vec<T>> {
    let mut out = vec![];
    for entry in index.scan_prefix(prefix.as_bytes()) {
        let (_, primary_key) = entry?;
        if let Some(raw) = primary.get(&primary_key)? {
            out.push(decode(&raw)?);
        }
    }
    Ok(out)
}

impl SledStore {
    pub fn new(instance: Arc<Db>) -> anyhow::Result<Self> {
        let store = Self {
            deposits: instance.open_tree("deposits")?,
            deposit_index: instance.open_tree("deposits_by_triple")?,
            reservations: instance.open_tree("reservations")?,
            approvals: instance.open_tree("reservation_approvals")?,
            products: instance.open_tree("products")?,
            staff: instance.open_tree("staff")?,
            datasets: instance.open_tree("datasets")?,
            batches: instance.open_tree("batches")?,
            notifications: instance.open_tree("notifications")?,
            generic: instance.open_tree("pool:generic")?,
            bonanza: instance.open_tree("pool:bonanza")?,
            member_withdrawal: instance.open_tree("pool:member_withdrawal")?,
            item_index: instance.open_tree("items_by_product")?,
            instance,
        };

        // databases written before the indexes existed get them built once
        let unindexed_items = store.item_index.is_empty()
            && Pool::ALL.iter().any(|p| !store.pool(*p).is_empty());
        let unindexed_deposits = store.deposit_index.is_empty() && !store.deposits.is_empty();
        if unindexed_items || unindexed_deposits {
            store.rebuild_indexes()?;
        }
        Ok(store)
    }
    /// A throwaway database removed when dropped.
    pub fn temporary() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(Arc::new(db))
    }
    /// Drop and rebuild the deposit and work-item indexes from the primary trees.
    pub fn rebuild_indexes(&self) -> anyhow::Result<()> {
        self.deposit_index.clear()?;
        for entry in self.deposits.iter() {
            let (key, raw) = entry?;
            let record: DepositRecord = decode(&raw)?;
            self.deposit_index
                .insert(deposit_index_key(&record).as_bytes(), key)?;
        }

        self.item_index.clear()?;
        for pool in Pool::ALL {
            for entry in self.pool(pool).iter() {
                let (key, raw) = entry?;
                let item: WorkItem = decode(&raw)?;
                self.item_index
                    .insert(item_index_key(pool, &item).as_bytes(), key)?;
            }
        }
        info!(
            deposits = self.deposit_index.len(),
            items = self.item_index.len(),
            "rebuilt store indexes"
        );
        Ok(())
    }
    pub fn flush(&self) -> anyhow::Result<()> {
        self.instance.flush()?;
        Ok(())
    }
    fn pool(&self, pool: Pool) -> &Tree {
        match pool {
            Pool::Generic => &self.generic,
            Pool::Bonanza => &self.bonanza,
            Pool::MemberWithdrawal => &self.member_withdrawal,
        }
    }
    pub fn notifications_for(&self, user_id: &str) -> anyhow::Result<Vec<Notification>> {
        let all: Vec<Notification> = collect(self.notifications.iter())?;
        Ok(all.into_iter().filter(|n| n.user_id == user_id).collect())
    }
}

impl DepositRepository for SledStore {
    fn put_deposit(&self, record: &DepositRecord) -> anyhow::Result<()> {
        let index_key = deposit_index_key(record);
        if let Some(previous) = get::<DepositRecord>(&self.deposits, &record.id)? {
            let stale = deposit_index_key(&previous);
            if stale != index_key {
                self.deposit_index.remove(stale.as_bytes())?;
            }
        }
        self.deposit_index
            .insert(index_key.as_bytes(), record.id.as_bytes())?;
        put(&self.deposits, &record.id, record)
    }
    fn deposit(&self, id: &str) -> anyhow::Result<Option<DepositRecord>> {
        get(&self.deposits, id)
    }
    fn remove_deposit(&self, id: &str) -> anyhow::Result<Option<DepositRecord>> {
        let removed: Option<DepositRecord> = take(&self.deposits, id)?;
        if let Some(record) = &removed {
            self.deposit_index
                .remove(deposit_index_key(record).as_bytes())?;
        }
        Ok(removed)
    }
    fn deposits(&self, product_id: Option<&str>) -> anyhow::Result<Vec<DepositRecord>> {
        match product_id {
            Some(product) => {
                let scoped: Vec<DepositRecord> =
                    indexed(&self.deposit_index, &self.deposits, &format!("{product}/"))?;
                Ok(scoped
                    .into_iter()
                    .filter(|r| r.product_id == product)
                    .collect())
            }
            None => collect(self.deposits.iter()),
        }
    }
    fn deposits_for_triple(&self, triple: &Triple) -> anyhow::Result<Vec<DepositRecord>> {
        let scoped: Vec<DepositRecord> =
            indexed(&self.deposit_index, &self.deposits, &triple_prefix(triple))?;
        Ok(scoped
            .into_iter()
            .filter(|r| &Triple::of(r) == triple)
            .collect())
    }
}

impl WorkItemRepository for SledStore {
    fn put_item(&self, pool: Pool, item: &WorkItem) -> anyhow::Result<()> {
        let tree = self.pool(pool);
        let key = item_key(&item.dataset_id, &item.id);
        let index_key = item_index_key(pool, item);
        if let Some(previous) = get::<WorkItem>(tree, &key)? {
            let stale = item_index_key(pool, &previous);
            if stale != index_key {
                self.item_index.remove(stale.as_bytes())?;
            }
        }
        self.item_index.insert(index_key.as_bytes(), key.as_bytes())?;
        put(tree, &key, item)
    }
    fn item(
        &self,
        pool: Pool,
        dataset_id: &str,
        item_id: &str,
    ) -> anyhow::Result<Option<WorkItem>> {
        get(self.pool(pool), &item_key(dataset_id, item_id))
    }
    fn items_in_dataset(&self, pool: Pool, dataset_id: &str) -> anyhow::Result<Vec<WorkItem>> {
        collect(self.pool(pool).scan_prefix(format!("{dataset_id}/").as_bytes()))
    }
    fn items_for_product(&self, pool: Pool, product_id: &str) -> anyhow::Result<Vec<WorkItem>> {
        let scoped: Vec<WorkItem> = indexed(
            &self.item_index,
            self.pool(pool),
            &format!("{pool}/{product_id}/"),
        )?;
        Ok(scoped
            .into_iter()
            .filter(|item| item.product_id == product_id)
            .collect())
    }
    fn relocate_item(
        &self,
        pool: Pool,
        item: &WorkItem,
        to_dataset_id: &str,
    ) -> anyhow::Result<WorkItem> {
        let mut moved = item.clone();
        moved.dataset_id = to_dataset_id.to_string();

        let moved_key = item_key(to_dataset_id, &item.id);
        self.item_index
            .insert(item_index_key(pool, &moved).as_bytes(), moved_key.as_bytes())?;

        let mut batch = Batch::default();
        batch.remove(item_key(&item.dataset_id, &item.id).as_bytes());
        batch.insert(moved_key.as_bytes(), encode(&moved)?);
        self.pool(pool).apply_batch(batch)?;

        self.item_index
            .remove(item_index_key(pool, item).as_bytes())?;
        Ok(moved)
    }
}

impl ReservationRepository for SledStore {
    fn put_reservation(&self, reservation: &Reservation) -> anyhow::Result<()> {
        put(&self.reservations, &reservation.id, reservation)
    }
    fn reservation(&self, id: &str) -> anyhow::Result<Option<Reservation>> {
        get(&self.reservations, id)
    }
    fn remove_reservation(&self, id: &str) -> anyhow::Result<Option<Reservation>> {
        take(&self.reservations, id)
    }
    fn reservations(&self) -> anyhow::Result<Vec<Reservation>> {
        collect(self.reservations.iter())
    }
    fn replace_reservation(
        &self,
        current: &Reservation,
        next: &Reservation,
    ) -> anyhow::Result<bool> {
        let key = current.id.as_bytes();
        let Some(raw) = self.reservations.get(key)? else {
            return Ok(false);
        };
        let stored: Reservation = decode(&raw)?;
        if &stored != current {
            return Ok(false);
        }
        Ok(self
            .reservations
            .compare_and_swap(key, Some(raw), Some(encode(next)?))?
            .is_ok())
    }
    fn claim_approval(&self, key: &str, reservation_id: &str) -> anyhow::Result<Option<String>> {
        let swap = self.approvals.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(reservation_id.as_bytes()),
        )?;
        match swap {
            Ok(()) => Ok(None),
            Err(held) => {
                let holder = held
                    .current
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default();
                if holder == reservation_id {
                    Ok(None)
                } else {
                    Ok(Some(holder))
                }
            }
        }
    }
    fn release_approval(&self, key: &str, reservation_id: &str) -> anyhow::Result<()> {
        // only the holder may release; a mismatch means someone else owns the slot
        let _ = self.approvals.compare_and_swap(
            key.as_bytes(),
            Some(reservation_id.as_bytes()),
            None as Option<&[u8]>,
        )?;
        Ok(())
    }
}

impl Registry for SledStore {
    fn put_product(&self, product: &Product) -> anyhow::Result<()> {
        put(&self.products, &product.id, product)
    }
    fn product(&self, id: &str) -> anyhow::Result<Option<Product>> {
        get(&self.products, id)
    }
    fn put_staff(&self, staff: &Staff) -> anyhow::Result<()> {
        put(&self.staff, &staff.id, staff)
    }
    fn staff(&self, id: &str) -> anyhow::Result<Option<Staff>> {
        get(&self.staff, id)
    }
    fn put_dataset(&self, dataset: &Dataset) -> anyhow::Result<()> {
        put(&self.datasets, &dataset.id, dataset)
    }
    fn dataset(&self, id: &str) -> anyhow::Result<Option<Dataset>> {
        get(&self.datasets, id)
    }
    fn datasets(&self, pool: Pool) -> anyhow::Result<Vec<Dataset>> {
        let all: Vec<Dataset> = collect(self.datasets.iter())?;
        Ok(all.into_iter().filter(|d| d.pool == pool).collect())
    }
}

impl BatchRepository for SledStore {
    fn put_batch(&self, batch: &work_item::Batch) -> anyhow::Result<()> {
        put(&self.batches, &batch.id, batch)
    }
    fn batch(&self, id: &str) -> anyhow::Result<Option<work_item::Batch>> {
        get(&self.batches, id)
    }
    fn batches(&self, pool: Pool) -> anyhow::Result<Vec<work_item::Batch>> {
        let all: Vec<work_item::Batch> = collect(self.batches.iter())?;
        Ok(all.into_iter().filter(|b| b.pool == pool).collect())
    }
    fn remove_batch(&self, id: &str) -> anyhow::Result<()> {
        self.batches.remove(id.as_bytes())?;
        Ok(())
    }
}

impl NotificationSink for SledStore {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        put(&self.notifications, &notification.id, notification)
    }
}
