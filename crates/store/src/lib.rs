//! Durable storage for the library lending system.
//!
//! The [`LibraryStore`] trait is the only place coordination happens: every
//! multi-record operation is handed over as one [`UnitOfWork`] and applied
//! atomically, with optimistic version checks on each updated record.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{RecordKind, Result, StoreError};
pub use memory::InMemoryLibraryStore;
pub use postgres::PostgresLibraryStore;
pub use query::{LoanQuery, RequestQuery, SortOrder};
pub use store::{Change, LibraryStore, LibraryStoreExt, UnitOfWork, constraints};
