//! REST API handlers organized by domain.

pub mod health;
pub mod records;
pub mod scans;

pub use health::*;
pub use records::*;
pub use scans::*;
