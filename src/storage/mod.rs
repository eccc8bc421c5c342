//! Storage tiers and the key scheme.
//!
//! Everything durable goes through [`KeyValueStore`], which absorbs backend
//! failures behind an in-memory shadow; nothing in the crate touches a
//! platform store directly.

pub mod backend;
pub mod credentials;
pub mod filters;
pub mod keys;
pub mod kv;

pub use backend::{BackendError, FileBackend, MemoryBackend, StorageBackend};
pub use credentials::CredentialStore;
pub use filters::FilterStore;
pub use kv::KeyValueStore;
