//! Debounced write-back of edited files to the object store.

mod scheduler;

pub use scheduler::{WriteBackScheduler, DEFAULT_QUIESCENCE_WINDOW};
