//! SQLite scan ledger for single-node deployments.

mod ledger;

pub use ledger::*;
