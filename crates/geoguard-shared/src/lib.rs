//! Types shared between the GeoGuard tracker client and the document store
//! server: the location data model, the error taxonomy, the admin policy and
//! the messages exchanged between a page and the background worker.

pub mod admin;
pub mod constants;
pub mod document;
pub mod error;
pub mod protocol;
pub mod types;

pub use admin::AdminPolicy;
pub use document::{merge_document, Document};
pub use error::{RemoteError, SamplerError};
pub use types::*;
