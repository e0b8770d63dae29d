//! Control plane (spec §4.6): a small REST surface over the Store, with
//! every response body wrapped in the `{"result": ..., "error": bool}`
//! envelope.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::ApiServer;

use serde::Serialize;
use serde_json::{json, Value};

/// Wrap a successful handler result in the fixed control-plane envelope.
pub fn envelope<T: Serialize>(result: T) -> Value {
    json!({
        "result": result,
        "error": false,
    })
}
