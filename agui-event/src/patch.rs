//! JSON Patch (RFC 6902) operations as they appear in STATE_DELTA and
//! ACTIVITY_DELTA payloads. Application lives in the client runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One RFC 6902 operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JsonPatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}
