//! Lending workflow for the library system.
//!
//! [`WorkflowEngine`] is the single writer of request statuses and copy
//! counts. Its entry points take the acting user explicitly, check the role
//! the operation needs, and commit each multi-record change as one atomic
//! unit of work against a [`store::LibraryStore`].

pub mod dashboard;
pub mod engine;
pub mod error;

pub use dashboard::{DASHBOARD_LIST_LEN, LibrarianDashboard, StudentDashboard};
pub use engine::{MAX_ATTEMPTS, WorkflowEngine};
pub use error::{ErrorKind, Result, WorkflowError};
