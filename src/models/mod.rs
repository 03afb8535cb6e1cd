//! Data models for the collection store.
//!
//! Records are opaque JSON objects; only `id` and the two timestamps are interpreted here.

mod action;
mod collection;
mod record;

pub use action::*;
pub use collection::*;
pub use record::*;
