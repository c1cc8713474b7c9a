#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// A typed hash map over the linear-probing engine.
///
/// This module provides a `HashMap` generic over its key, value, and hasher
/// builder, storing each entry as a native `{ key, value }` record.
pub mod hash_map;

/// A hash map over opaque fixed-size byte strings, driven at runtime by a
/// [`TypeDescriptor`].
pub mod erased_map;

/// Sizing policy shared by every table.
///
/// A table starts with `2^initial_power` slots, doubles when live entries plus
/// tombstones exceed `max_load` of its slots, and halves when live entries
/// alone fall below `min_load`. It never shrinks below the size it was created
/// with, which is at least the initial power.
pub mod config;

/// Runtime description of the key and value types stored in an
/// [`ErasedMap`](crate::ErasedMap).
pub mod descriptor;

/// Error types returned by table operations.
///
/// Each operation reports a small closed set of failures: creation can reject
/// the [`TypeDescriptor`](crate::TypeDescriptor) or fail to allocate, growth
/// can fail to allocate, and erase can miss. A lookup miss is not an error.
pub mod error;

/// Probe-length and memory statistics for tuning and debugging.
///
/// Available with the `stats` feature. Both maps expose
/// `probe_histogram()` and `debug_stats()`.
#[cfg(feature = "stats")]
pub mod stats;
#[cfg(all(test, not(feature = "stats")))]
mod stats;

mod raw;

pub use config::Config;
pub use descriptor::TypeDescriptor;
pub use erased_map::ErasedMap;
pub use error::CreateError;
pub use error::Error;
pub use error::InvalidType;
pub use error::NoSuchKey;
pub use error::OutOfMemory;
pub use hash_map::HashMap;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hasher builder used by [`HashMap`] when none is named.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// Hasher builder used by [`HashMap`] when none is named.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder when no default hasher is available; name a hasher
        /// builder explicitly.
        pub enum DefaultHashBuilder {}
    }
}
