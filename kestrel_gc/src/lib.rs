//! # Kestrel GC
//!
//! Cycle detection for reference-counted objects.
//!
//! Objects are freed by their reference counts. This crate only handles the
//! leftover case: groups of objects that reference each other and nothing
//! else. See [`CycleCollector`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collector;

pub use collector::{CollectStats, CycleCollector};
