pub mod audit;
pub mod classify;
pub mod config;
pub mod deposit;
pub mod error;
pub mod identity;
pub mod invalidation;
pub mod logging;
pub mod notify;
pub mod report;
pub mod reservation;
pub mod store;
pub mod types;
pub mod utils;
pub mod work_item;

pub use error::LedgerError;
pub use store::{LedgerStore, SledStore};
