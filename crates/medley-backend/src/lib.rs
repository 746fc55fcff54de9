//! # medley-backend
//!
//! The seam between the sync core and the wire protocols.  Each backend
//! protocol (Blossom, NIP-96, Satellite) provides one [`BlobBackend`]
//! implementation; the core dispatches through a [`BackendRegistry`]
//! keyed by [`medley_shared::ServerKind`].
//!
//! The wire clients themselves live outside this workspace.  This crate
//! only defines their contracts, the signer capability, and the error
//! surface the core classifies failures from.

pub mod backend;
pub mod registry;
pub mod signer;

mod error;

pub use backend::{BlobBackend, ProgressFn, UploadSource};
pub use error::BackendError;
pub use registry::BackendRegistry;
pub use signer::{EventTemplate, SignedEvent, Signer};
