//! Async coordination utilities.
//!
//! This crate provides two small building blocks:
//! - `Debouncer` - Keyed debounce where superseded calls resolve with a fallback
//! - `Deferred` / `flatten` - Resolve nested deferred values to a concrete one

pub mod debounce;
pub mod deferred;

pub use debounce::{DebounceError, DebounceOptions, Debouncer, debounce};
pub use deferred::{Deferred, flatten};
