//! Session identity: types, the device-local registry, the per-tab active
//! pointer, and the legacy storage migration.

pub mod migrate;
pub mod pointer;
pub mod registry;
pub mod types;

pub use migrate::LegacyMigrator;
pub use pointer::ActiveSessionPointer;
pub use registry::SessionRegistry;
pub use types::{ContactPerson, ProjectSnapshot, SessionKey, SessionType, StoredSession};
