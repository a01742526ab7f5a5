//! Shared types for the library lending system.

mod types;
mod version;

pub use types::{BookId, LoanId, RequestId, UserId};
pub use version::Version;
