//! Domain models for the RFID scan ledger.

mod scan;

pub use scan::*;
