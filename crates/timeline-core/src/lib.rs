//! timeline-core library.
//!
//! Rebuilds the version history of entities whose earliest stored version is
//! too recent, by undoing recorded field-level activities backwards in time.
//!
//! - [`store`]: the [`Store`] seam plus SQLite and in-memory implementations
//! - [`loader`]: per-chunk snapshot of anchors, activities and creation instants
//! - [`history`]: undo function, backward rebuild, partition check
//! - [`inconsistency`]: JSON-lines log of activities that disagree with the data
//! - [`orchestrator`]: chunked, concurrent [`reconstruct`] runs
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in the library, each mapping to an
//!   [`ErrorCode`]; `anyhow::Result` for config loading and the CLI.
//! - **Logging**: `tracing` macros with structured fields (`chunk`, `oid`, ...).

pub mod config;
pub mod error;
pub mod history;
pub mod inconsistency;
pub mod loader;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod store;

pub use error::ErrorCode;
pub use inconsistency::{Inconsistency, InconsistencyLog};
pub use model::{Activity, Instant, Oid, VersionDocument, VersionId};
pub use orchestrator::{ReconstructError, ReconstructOptions, RunReport, reconstruct};
pub use store::{MemoryStore, SqliteStore, Store, StoreError};
