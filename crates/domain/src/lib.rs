//! Domain layer for the library lending system.
//!
//! This crate holds the passive records kept by the three ledgers and the
//! local rules each record enforces on itself:
//! - [`Book`] keeps `0 <= available_copies <= total_copies`
//! - [`BookRequest`] walks the pending → approved → issued / rejected state machine
//! - [`IssuedBook`] is closed exactly once
//!
//! Cross-record coordination (and persistence) lives in the `workflow` and
//! `store` crates.

pub mod actor;
pub mod inventory;
pub mod loan;
pub mod request;

pub use actor::{Actor, PermissionDenied, Role};
pub use inventory::{Book, BookUpdate, InventoryError, MAX_COPIES, NewBook};
pub use loan::{IssuedBook, LOAN_PERIOD_DAYS, LoanError};
pub use request::{BookRequest, ParseStatusError, RequestError, RequestStatus};
