//! Device repositories
//!
//! The heartbeat engine does not own device records. It talks to whatever
//! registry holds them through the [`DeviceRepository`] trait.
//!
//! ## Backends
//!
//! - **In-Memory**: no persistence, used for tests and config-only setups
//! - **SQLite** (default): embedded database with sqlx migrations

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::DeviceRepository;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryRepository;
