//! Raw JWT claims as decoded off the wire, before being mapped into the
//! engine's transport-agnostic `AuthContext` (`resource_engine_core::gate`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard registered claims plus whatever custom claims the token carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Flatten registered + custom claims into one map, the shape
    /// `AuthContext::claims` expects.
    pub fn into_map(self) -> HashMap<String, serde_json::Value> {
        let mut map = self.extra;
        if let Some(sub) = self.sub {
            map.insert("sub".into(), serde_json::Value::String(sub));
        }
        if let Some(iss) = self.iss {
            map.insert("iss".into(), serde_json::Value::String(iss));
        }
        if let Some(exp) = self.exp {
            map.insert("exp".into(), serde_json::Value::Number(exp.into()));
        }
        if let Some(aud) = self.aud {
            map.insert("aud".into(), serde_json::Value::String(aud));
        }
        map
    }
}
