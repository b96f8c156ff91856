//! Events carried over the message bus between coordinator and worker.
//!
//! Delivery is at-least-once; every handler on either side is idempotent
//! under duplicates. The job identifier (`submission_id`) is coordinator
//! issued and independent of backend attempt/step IDs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Job request published by the coordinator, topic-keyed by the target
/// checker system name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequestEvent {
    pub submission_id: Uuid,
    /// Logical file name -> content hash in the shared file cache.
    pub files: HashMap<String, String>,
    /// Plain (non-file) submission parameters, mixed scalar types.
    pub plain_parameters: HashMap<String, Value>,
}

/// Terminal verdict published by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResultEvent {
    pub submission_id: Uuid,
    /// Serialized [`Verdict`](crate::verdict::Verdict).
    pub serialized_result: String,
    /// Redelivery counter for the reconciler's bounded-retry policy.
    /// Absent on the wire until the first redelivery.
    #[serde(default)]
    pub delivery_attempts: u32,
}

/// Observational lifecycle status published by the worker at each pipeline
/// stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckStatusEvent {
    pub submission_id: Uuid,
    pub serialized_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_event_round_trips() {
        let event = CheckRequestEvent {
            submission_id: Uuid::new_v4(),
            files: HashMap::from([
                ("submission".to_string(), "abc123".to_string()),
                ("template".to_string(), "def456".to_string()),
            ]),
            plain_parameters: HashMap::from([(
                "android_package_name".to_string(),
                Value::String("com.example.app.test".to_string()),
            )]),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: CheckRequestEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn result_event_defaults_delivery_attempts() {
        let json = format!(
            "{{\"submission_id\":\"{}\",\"serialized_result\":\"{{}}\"}}",
            Uuid::new_v4()
        );
        let event: CheckResultEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.delivery_attempts, 0);
    }
}
