//! Feature matrix storage.
//!
//! Split finding consumes features column-by-column in ascending value
//! order, so the canonical storage is a compressed sparse column matrix
//! whose columns are sorted by feature value. See [`CscMatrix`].

mod csc;

pub use csc::{CscMatrix, Entry};
