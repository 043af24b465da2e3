//! # Domain Layer
//!
//! Pure data structures and policy with no I/O. Everything here is
//! synchronous and can be unit tested without mocks.
//!
//! ## Contents
//!
//! - **slab**: fixed-capacity arena with an O(1) free list
//! - **hashlist**: hash-indexed, expiry-sorted table built on the slab
//! - **value_objects**: `Timestamp`, modular `SequenceNumber`, `SequenceCounter`
//! - **entities**: binding cache and binding update list records
//! - **options**: mobility options queued by the scheduler
//! - **messages**: decoded binding messages crossing the inbound API
//! - **rate_limit**: fast/slow update send-rate policy
//! - **config**: table sizes and timing policy
//! - **errors**: per-component error enums

mod config;
mod entities;
mod errors;
mod hashlist;
mod messages;
mod options;
mod rate_limit;
mod slab;
mod value_objects;

pub use config::*;
pub use entities::*;
pub use errors::*;
pub use hashlist::*;
pub use messages::*;
pub use options::*;
pub use rate_limit::*;
pub use slab::*;
pub use value_objects::*;
