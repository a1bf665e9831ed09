// src/remap/mod.rs
//! Identity and time remapping of captured events
//!
//! A [`Remapper`] turns one captured ingestion event into its replayed form:
//!
//! - `$session_id` / `$window_id` go through the run's [`IdentityMapping`],
//!   so a recording and its correlated events land on the same new session
//! - user identities are replaced: identified visitors become the target
//!   user, everyone else becomes the run's single anonymous id
//! - every top-level and nested snapshot timestamp moves by one [`TimeShift`]
//! - blobs flagged at capture time are recompressed to wire form
//!
//! The remapper itself is immutable; the only mutable state it touches is
//! the mapping passed into [`Remapper::remap_event`].

mod identity;
mod recompress;
mod time;

pub use identity::IdentityMapping;
pub use recompress::{BlobCompressor, recompress};
pub use time::{TimeShift, earliest_timestamp, resolve_offset, timestamp_millis};

use crate::capture::snapshot::snapshot_items_mut;
use crate::config::ReplayConfig;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Event properties holding session-scoped ids
pub const SESSION_PROPERTIES: [&str; 2] = ["$session_id", "$window_id"];

/// Properties that name the visitor as whoever the event is attributed to
const DISTINCT_ID_PROPERTIES: [&str; 2] = ["distinct_id", "$user_id"];

/// Properties that always hold the anonymous device identity
const ANONYMOUS_ID_PROPERTIES: [&str; 2] = ["$device_id", "$anon_distinct_id"];

/// Rewrites captured events for one recording of a replay run
#[derive(Debug, Clone)]
pub struct Remapper {
    config: ReplayConfig,
    anonymous_id: String,
    shift: TimeShift,
}

impl Remapper {
    /// `anonymous_id` is shared by every recording of the run
    pub fn new(config: ReplayConfig, anonymous_id: String, shift: TimeShift) -> Self {
        Self {
            config,
            anonymous_id,
            shift,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn shift(&self) -> TimeShift {
        self.shift
    }

    /// Produce the replayed copy of one event
    ///
    /// Fails only when a flagged blob cannot be recompressed; the caller
    /// treats that as a hard error for this event.
    pub fn remap_event(&self, event: &Value, mapping: &mut IdentityMapping) -> Result<Value> {
        let mut event = event.clone();
        let Value::Object(object) = &mut event else {
            return Err(Error::ParseError("event is not a JSON object".to_string()));
        };

        if !object.get("properties").is_some_and(Value::is_object) {
            object.insert("properties".to_string(), Value::Object(Map::new()));
        }

        self.remap_sessions(object, mapping);
        self.remap_user(object);
        self.shift_times(&mut event);

        if let Value::Object(object) = &mut event {
            if object.contains_key("uuid") {
                object.insert("uuid".to_string(), Value::String(Uuid::now_v7().to_string()));
            }
            // Clients send either `timestamp` or `offset`; an explicit
            // timestamp must win on ingestion
            if object.contains_key("timestamp") {
                object.remove("offset");
            }
            if let Some(Value::Object(properties)) = object.get_mut("properties") {
                properties.insert(
                    "token".to_string(),
                    Value::String(self.config.project_key.clone()),
                );
            }
        }

        recompress(&mut event)?;
        Ok(event)
    }

    fn remap_sessions(&self, object: &mut Map<String, Value>, mapping: &mut IdentityMapping) {
        let Some(Value::Object(properties)) = object.get_mut("properties") else {
            return;
        };
        for key in SESSION_PROPERTIES {
            if let Some(Value::String(original)) = properties.get_mut(key) {
                *original = mapping.get_or_create(original.as_str());
            }
        }
    }

    fn remap_user(&self, object: &mut Map<String, Value>) {
        let properties = object.get("properties").and_then(Value::as_object);
        let identified = properties
            .and_then(|p| p.get("$is_identified"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let replacement = if identified {
            &self.config.target_user_id
        } else {
            &self.anonymous_id
        };

        // Anonymous ids first so a distinct id equal to the device id
        // still resolves by the identified/anonymous rule
        let mut substitutions: HashMap<String, String> = HashMap::new();
        if let Some(properties) = properties {
            for key in ANONYMOUS_ID_PROPERTIES {
                if let Some(original) = properties.get(key).and_then(Value::as_str) {
                    substitutions.insert(original.to_string(), self.anonymous_id.clone());
                }
            }
            for key in DISTINCT_ID_PROPERTIES {
                if let Some(original) = properties.get(key).and_then(Value::as_str) {
                    substitutions.insert(original.to_string(), replacement.clone());
                }
            }
        }
        if let Some(original) = object.get("distinct_id").and_then(Value::as_str) {
            substitutions.insert(original.to_string(), replacement.clone());
        }

        // Replacement ids are never rewritten again
        substitutions.retain(|original, new| original != new);

        for value in object.values_mut() {
            substitute_strings(value, &substitutions);
        }

        let has_distinct_id = object.contains_key("distinct_id")
            || object
                .get("properties")
                .is_some_and(|p| p.get("distinct_id").is_some());
        if !has_distinct_id {
            object.insert("distinct_id".to_string(), Value::String(replacement.clone()));
        }
    }

    fn shift_times(&self, event: &mut Value) {
        if let Some(timestamp) = event.get_mut("timestamp") {
            self.shift.shift_value(timestamp);
        }
        for item in snapshot_items_mut(event) {
            if let Some(timestamp) = item.get_mut("timestamp") {
                self.shift.shift_value(timestamp);
            }
        }
    }
}

/// Replace every string equal to a key of `substitutions`, at any depth
fn substitute_strings(value: &mut Value, substitutions: &HashMap<String, String>) {
    match value {
        Value::String(text) => {
            if let Some(new) = substitutions.get(text.as_str()) {
                *text = new.clone();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_strings(item, substitutions);
            }
        }
        Value::Object(object) => {
            for item in object.values_mut() {
                substitute_strings(item, substitutions);
            }
        }
        _ => {}
    }
}
