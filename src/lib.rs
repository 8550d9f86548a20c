//! Lapse is a concurrency-safe, in-memory key-value cache where every entry carries its own
//! expiration [`Deadline`].
//!
//! Entries can be written three ways.
//! - [`Store::set`] : expires after the store's default timeout, or never if none is configured.
//! - [`Store::set_with_timeout`] : expires after the given duration.
//! - [`Store::set_with_deadline`] : expires at the given [`Deadline`], which may be [`Deadline::Never`].
//!
//! Expired entries are never returned. Reads evict the expired entries they come across, and
//! [`Store::prune`] evicts all of them in one pass. Call it periodically, or let a [`Pruner`] do
//! it, to reclaim memory held by expired entries nobody reads anymore.
//!
//! # Examples
//! ```
//! use std::thread::sleep;
//! use std::time::Duration;
//!
//! use lapse::{Deadline, Store};
//!
//! fn main() {
//!     let cache = Store::new();
//!
//!     cache.set_with_timeout("Still", "Alive", Duration::from_secs(3));
//!     cache.set_with_timeout("Gonna", "Die", Duration::from_millis(100));
//!     cache.set("Always", "Here");
//!
//!     sleep(Duration::from_millis(200));
//!
//!     assert_eq!(cache.get("Still").map(|(v, _)| v), Some("Alive"));
//!     assert_eq!(cache.get("Gonna"), None);
//!     assert_eq!(cache.get("Always"), Some(("Here", Deadline::Never)));
//! }
//! ```

// for internal use.
pub(crate) mod entry;
pub(crate) mod hash;

// for external use.
mod deadline;
mod options;
mod pruner;
mod store;

pub use crate::deadline::Deadline;
pub(crate) use crate::entry::Entry;
pub use crate::options::StoreOptions;
pub use crate::pruner::Pruner;
pub use crate::store::Store;
