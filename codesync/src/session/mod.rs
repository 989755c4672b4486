//! Session routing: one router per live connection.

mod locks;
mod registry;
mod router;

pub use locks::FileLocks;
pub use router::{SessionRouter, SyncContext};
