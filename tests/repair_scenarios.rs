use anyhow::Context;
use deposit_ledger::{
    SledStore,
    audit::{self, UnfixableItem},
    identity::CustomerIdentity,
    store::{BatchRepository, Registry, WorkItemRepository},
    types::{Product, Staff, TimeStamp},
    work_item::{Batch, Dataset, Pool, WorkItem, WorkItemStatus},
};

fn seeded() -> anyhow::Result<SledStore> {
    let store = SledStore::temporary()?;
    store.put_product(&Product::new("alpha", "Alpha"))?;
    store.put_product(&Product::new("beta", "Beta"))?;
    store.put_staff(&Staff::new("s1", "Sari"))?;
    store.put_staff(&Staff::new("s2", "Budi"))?;
    Ok(store)
}

fn dataset(store: &SledStore, pool: Pool, product: &str) -> anyhow::Result<Dataset> {
    let dataset = Dataset::new(pool, product, "upload")?;
    store.put_dataset(&dataset)?;
    Ok(dataset)
}

fn item(dataset: &Dataset, customer: &str) -> anyhow::Result<WorkItem> {
    let mut item = WorkItem::new(
        dataset,
        CustomerIdentity::default().with_field("username", customer),
    )?;
    item.product_name = Some("Alpha".to_string());
    Ok(item)
}

fn reload(store: &SledStore, pool: Pool, item: &WorkItem) -> anyhow::Result<WorkItem> {
    store
        .item(pool, &item.dataset_id, &item.id)?
        .context("item missing")
}

#[test]
fn legacy_invalid_items_are_reinterpreted() -> anyhow::Result<()> {
    let store = seeded()?;
    let generic = dataset(&store, Pool::Generic, "alpha")?;

    // invalid with an assignee but no invalidation details
    let mut held = item(&generic, "c1")?;
    held.assign(&Staff::new("s2", "Budi"), None);
    held.status = WorkItemStatus::Invalid;
    store.put_item(Pool::Generic, &held)?;

    // invalid with nobody behind it
    let mut loose = item(&generic, "c2")?;
    loose.status = WorkItemStatus::Invalid;
    store.put_item(Pool::Generic, &loose)?;

    let report = audit::health_check(&store)?;
    assert_eq!(report.datasets[0].legacy_invalid, 2);
    assert!(!report.is_healthy());

    let summary = audit::repair(&store)?;
    assert_eq!(summary.reinterpreted_as_assigned, 1);
    assert_eq!(summary.demoted_to_available, 1);

    let held = reload(&store, Pool::Generic, &held)?;
    assert_eq!(held.status, WorkItemStatus::Assigned);
    assert!(held.conflict_flag);
    assert!(held.is_assigned_to("s2"));

    let loose = reload(&store, Pool::Generic, &loose)?;
    assert_eq!(loose.status, WorkItemStatus::Available);

    Ok(())
}

#[test]
fn unknown_statuses_and_orphans_become_available() -> anyhow::Result<()> {
    let store = seeded()?;
    let bonanza = dataset(&store, Pool::Bonanza, "alpha")?;

    let mut odd = item(&bonanza, "c1")?;
    odd.status = WorkItemStatus::parse("pending_review");
    odd.assigned_staff_id = Some("s1".to_string());
    odd.assigned_staff_name = Some("Sari".to_string());
    store.put_item(Pool::Bonanza, &odd)?;

    let mut orphan = item(&bonanza, "c2")?;
    orphan.status = WorkItemStatus::Assigned;
    store.put_item(Pool::Bonanza, &orphan)?;

    let report = audit::health_check(&store)?;
    assert_eq!(report.datasets[0].unknown_status, 1);
    assert_eq!(report.datasets[0].orphaned_assignments, 1);

    let summary = audit::repair(&store)?;
    assert_eq!(summary.demoted_to_available, 2);

    for stale in [&odd, &orphan] {
        let now = reload(&store, Pool::Bonanza, stale)?;
        assert_eq!(now.status, WorkItemStatus::Available);
        assert_eq!(now.assigned_staff_id, None);
    }

    Ok(())
}

#[test]
fn missing_names_are_filled_from_registries() -> anyhow::Result<()> {
    let store = seeded()?;
    let withdrawal = dataset(&store, Pool::MemberWithdrawal, "alpha")?;

    let mut bare = WorkItem::new(
        &withdrawal,
        CustomerIdentity::default().with_field("username", "c1"),
    )?;
    bare.status = WorkItemStatus::Assigned;
    bare.assigned_staff_id = Some("s1".to_string());
    store.put_item(Pool::MemberWithdrawal, &bare)?;

    assert_eq!(audit::health_check(&store)?.datasets[0].missing_metadata, 1);

    let summary = audit::repair(&store)?;
    assert_eq!(summary.metadata_filled, 1);

    let filled = reload(&store, Pool::MemberWithdrawal, &bare)?;
    assert_eq!(filled.product_name.as_deref(), Some("Alpha"));
    assert_eq!(filled.assigned_staff_name.as_deref(), Some("Sari"));

    Ok(())
}

#[test]
fn batch_counts_follow_live_assignments() -> anyhow::Result<()> {
    let store = seeded()?;
    let generic = dataset(&store, Pool::Generic, "alpha")?;

    let batch = |id: &str, count: u64| Batch {
        id: id.to_string(),
        pool: Pool::Generic,
        dataset_id: generic.id.clone(),
        staff_id: "s1".to_string(),
        product_id: "alpha".to_string(),
        assigned_count: count,
        created_at: TimeStamp::now(),
    };
    store.put_batch(&batch("batch-live", 5))?;
    store.put_batch(&batch("batch-empty", 3))?;

    for customer in ["c1", "c2"] {
        let mut assigned = item(&generic, customer)?;
        assigned.assign(&Staff::new("s1", "Sari"), Some("batch-live"));
        store.put_item(Pool::Generic, &assigned)?;
    }

    let report = audit::health_check(&store)?;
    assert_eq!(report.batch_drift.len(), 2);

    let summary = audit::repair(&store)?;
    assert_eq!(summary.batches_resynced, 1);
    assert_eq!(summary.batches_deleted, 1);

    let live = store.batch("batch-live")?.context("batch missing")?;
    assert_eq!(live.assigned_count, 2);
    assert!(store.batch("batch-empty")?.is_none());

    Ok(())
}

#[test]
fn repair_is_idempotent() -> anyhow::Result<()> {
    let store = seeded()?;
    let generic = dataset(&store, Pool::Generic, "alpha")?;

    let mut legacy = WorkItem::new(
        &generic,
        CustomerIdentity::default().with_field("username", "c1"),
    )?;
    legacy.assign(&Staff::new("s1", "Sari"), Some("batch-1"));
    legacy.assigned_staff_name = None;
    legacy.status = WorkItemStatus::Invalid;
    store.put_item(Pool::Generic, &legacy)?;
    store.put_batch(&Batch {
        id: "batch-1".to_string(),
        pool: Pool::Generic,
        dataset_id: generic.id.clone(),
        staff_id: "s1".to_string(),
        product_id: "alpha".to_string(),
        assigned_count: 4,
        created_at: TimeStamp::now(),
    })?;

    let first = audit::repair(&store)?;
    assert!(first.changes() > 0);

    let second = audit::repair(&store)?;
    assert_eq!(second.changes(), 0);
    assert!(audit::health_check(&store)?.is_healthy());

    Ok(())
}

#[test]
fn health_check_does_not_write() -> anyhow::Result<()> {
    let store = seeded()?;
    let generic = dataset(&store, Pool::Generic, "alpha")?;

    let mut broken = item(&generic, "c1")?;
    broken.status = WorkItemStatus::Invalid;
    broken.product_name = None;
    store.put_item(Pool::Generic, &broken)?;

    let first = audit::health_check(&store)?;
    let second = audit::health_check(&store)?;
    assert_eq!(first, second);
    assert_eq!(reload(&store, Pool::Generic, &broken)?, broken);

    Ok(())
}

#[test]
fn mismatched_items_move_to_their_product_dataset() -> anyhow::Result<()> {
    let store = seeded()?;
    let alpha = dataset(&store, Pool::Generic, "alpha")?;
    let beta = dataset(&store, Pool::Generic, "beta")?;
    let bonanza_alpha = dataset(&store, Pool::Bonanza, "alpha")?;

    let mut stray = item(&alpha, "c1")?;
    stray.product_id = "beta".to_string();
    store.put_item(Pool::Generic, &stray)?;

    // no bonanza dataset declares beta
    let mut stuck = item(&bonanza_alpha, "c2")?;
    stuck.product_id = "beta".to_string();
    store.put_item(Pool::Bonanza, &stuck)?;

    let report = audit::health_check(&store)?;
    let mismatches: usize = report.datasets.iter().map(|d| d.product_mismatches).sum();
    assert_eq!(mismatches, 2);

    let result = audit::repair_product_mismatches(&store)?;
    assert_eq!(result.relocated, 1);
    assert_eq!(
        result.unfixable,
        vec![UnfixableItem {
            pool: Pool::Bonanza,
            dataset_id: bonanza_alpha.id.clone(),
            item_id: stuck.id.clone(),
            product_id: "beta".to_string(),
        }]
    );

    assert!(store.item(Pool::Generic, &alpha.id, &stray.id)?.is_none());
    let moved = store
        .item(Pool::Generic, &beta.id, &stray.id)?
        .context("relocated item missing")?;
    assert_eq!(moved.dataset_id, beta.id);

    // a second pass only reports what it still cannot fix
    let again = audit::repair_product_mismatches(&store)?;
    assert_eq!(again.relocated, 0);
    assert_eq!(again.unfixable.len(), 1);

    Ok(())
}

#[test]
fn empty_batches_show_up_before_repair_deletes_them() -> anyhow::Result<()> {
    let store = seeded()?;
    let generic = dataset(&store, Pool::Generic, "alpha")?;
    store.put_batch(&Batch {
        id: "batch-spent".to_string(),
        pool: Pool::Generic,
        dataset_id: generic.id.clone(),
        staff_id: "s1".to_string(),
        product_id: "alpha".to_string(),
        assigned_count: 0,
        created_at: TimeStamp::now(),
    })?;

    let report = audit::health_check(&store)?;
    assert!(!report.is_healthy());
    assert_eq!(report.batch_drift.len(), 1);
    assert_eq!(report.batch_drift[0].cached, 0);
    assert_eq!(report.batch_drift[0].live, 0);

    let summary = audit::repair(&store)?;
    assert_eq!(summary.batches_deleted, 1);
    assert!(store.batch("batch-spent")?.is_none());
    assert!(audit::health_check(&store)?.is_healthy());

    Ok(())
}
