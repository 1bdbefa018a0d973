//! Session persistence.
//!
//! Authenticated sessions are stored as opaque blobs in a single JSON
//! file keyed by phone number, so several accounts can share one store.

mod store;

pub use store::{SessionBlob, SessionStore, SessionStoreError};
