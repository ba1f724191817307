//! The mapping protocol.
//!
//! Frame locals may be any object that supports keyed get, set and delete.
//! A missing key is reported as a `KeyError`; any other error is the
//! mapping's own failure and is propagated by callers that care.

use crate::error::CoreResult;
use crate::value::Value;

/// Keyed access by name.
pub trait Mapping {
    /// Look up `key`. Missing keys yield `KeyError`.
    fn get_item(&self, key: &str) -> CoreResult<Value>;

    /// Store `value` under `key`.
    fn set_item(&self, key: &str, value: Value) -> CoreResult<()>;

    /// Remove `key`. Missing keys yield `KeyError`.
    fn del_item(&self, key: &str) -> CoreResult<()>;
}
