//! Content relay: a single filtered upstream subscription whose matched items
//! are handed to one registered callback.

pub mod adapter;
pub mod port;
pub mod types;

pub use adapter::{StreamHandler, StreamRelay};
