//! Document-collection store.
//!
//! Collections live as whole JSON arrays on the storage backend. The repository moves whole
//! documents; the dispatcher turns actions into in-memory edits between one read and one write.

mod channels;
mod dispatcher;
mod polls;
mod repository;

pub use dispatcher::*;
pub use repository::*;
