//! Edit application engine.
//!
//! Pure text transformation: no I/O and no session context.

mod apply;

pub use apply::{apply, PartialEdit};
