//! Walk through a day of deposits and one reservation against a throwaway database.
//!
//! cargo run --example ledger
//! LEDGER_LOG=deposit_ledger=debug cargo run --example ledger

use deposit_ledger::{
    config::LedgerConfig,
    deposit::{self, ApprovalStatus, NewDeposit},
    identity::CustomerRef,
    logging,
    report::{self, DateRange},
    reservation,
    store::Registry,
    types::{Day, Principal, Product, Staff},
    work_item::{self, Dataset, Pool},
};

fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::from_toml_str("temporary = true\nlog_filter = \"info\"")?;
    logging::init(&config.log_filter)?;
    let store = config.open_store()?;

    store.put_product(&Product::new("alpha", "Alpha"))?;
    store.put_product(&Product::new("beta", "Beta"))?;
    store.put_staff(&Staff::new("s1", "Sari"))?;
    store.put_staff(&Staff::new("s2", "Budi"))?;

    let jan15 = Day::parse("2025-01-15")?;
    for (product, amount) in [("alpha", 500_000), ("beta", 300_000)] {
        deposit::record_deposit(
            &store,
            NewDeposit {
                staff_id: "s1".into(),
                customer_id: "CUST-12345".into(),
                product_id: product.into(),
                record_date: jan15,
                amount,
                note: String::new(),
                approval: ApprovalStatus::Approved,
            },
        )?;
    }
    for standing in report::staff_leaderboard(&store, DateRange::day(jan15))? {
        println!("{}: {:?}", standing.staff_id, standing.tally);
    }

    // Budi is working the customer in the generic pool when Sari reserves them
    let dataset = Dataset::new(Pool::Generic, "alpha", "january")?;
    store.put_dataset(&dataset)?;
    work_item::import_rows(
        &store,
        &dataset.id,
        vec![[("Username".to_string(), "cust-12345".to_string())].into()],
    )?;
    work_item::assign_random(&store, &dataset.id, "s2", 1)?;

    let approved = reservation::create_reservation(
        &store,
        &Principal::new("admin", "Admin"),
        "s1",
        &CustomerRef::by_id("CUST-12345"),
        "alpha",
        false,
    )?;
    println!("invalidated {} item(s)", approved.invalidation.count());

    let deleted = reservation::delete_reservation(&store, &approved.reservation.id)?;
    println!(
        "restored {} item(s)",
        deleted.restored.map_or(0, |r| r.restored_count())
    );
    Ok(())
}
