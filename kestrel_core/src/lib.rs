//! # Kestrel Core
//!
//! Value and object primitives shared by every Kestrel crate.
//!
//! - **Value System**: immediates plus reference-counted heap handles
//! - **Object Model**: the [`Object`] trait, cells, dictionaries and the mapping protocol
//! - **Tracing**: the [`Trace`]/[`Tracer`] pair consumed by the cycle collector
//! - **Error Handling**: [`CoreError`] and [`CoreResult`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cell;
pub mod dict;
pub mod error;
pub mod mapping;
pub mod object;
pub mod trace;
pub mod value;

pub use cell::CellObject;
pub use dict::DictObject;
pub use error::{CoreError, CoreResult};
pub use mapping::Mapping;
pub use object::Object;
pub use trace::{AddressCollector, Trace, Tracer, address_of};
pub use value::Value;

/// Kestrel runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
