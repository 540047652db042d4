//! PostgreSQL scan ledger for shared deployments.

mod ledger;

pub use ledger::*;
