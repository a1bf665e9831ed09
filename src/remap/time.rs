// src/remap/time.rs
//! Uniform time shift for replayed events

use crate::capture::snapshot::snapshot_items;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;

/// A single millisecond delta applied to every timestamp of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeShift {
    delta_ms: i64,
}

impl TimeShift {
    pub fn new(delta_ms: i64) -> Self {
        Self { delta_ms }
    }

    /// Shift that moves `earliest_ms` onto `target`
    ///
    /// None when the delta does not fit in an i64.
    pub fn between(earliest_ms: i64, target: DateTime<Utc>) -> Option<Self> {
        target.timestamp_millis().checked_sub(earliest_ms).map(Self::new)
    }

    pub fn delta_ms(&self) -> i64 {
        self.delta_ms
    }

    pub fn shift_millis(&self, ms: i64) -> Option<i64> {
        ms.checked_add(self.delta_ms)
    }

    /// Shift a timestamp value in place
    ///
    /// Integers are epoch milliseconds; strings are RFC 3339 and keep their
    /// offset and sub-second precision. Returns false for anything else,
    /// and for values the shift would push out of range; those are left
    /// unchanged.
    pub fn shift_value(&self, value: &mut Value) -> bool {
        if let Some(ms) = value.as_i64() {
            return match self.shift_millis(ms) {
                Some(shifted) => {
                    *value = Value::from(shifted);
                    true
                }
                None => false,
            };
        }
        if value.is_number() {
            if let Some(ms) = value.as_f64() {
                *value = Value::from(ms + self.delta_ms as f64);
                return true;
            }
            return false;
        }

        let Value::String(text) = value else {
            return false;
        };
        match DateTime::parse_from_rfc3339(text.as_str()) {
            Ok(parsed) => {
                let Some(shifted) = Duration::try_milliseconds(self.delta_ms)
                    .and_then(|delta| parsed.checked_add_signed(delta))
                else {
                    return false;
                };
                let use_z = text.ends_with('Z') || text.ends_with('z');
                *text = shifted.to_rfc3339_opts(seconds_format(text), use_z);
                true
            }
            Err(_) => false,
        }
    }
}

/// Fractional-second precision to write back, matching the original text
fn seconds_format(text: &str) -> SecondsFormat {
    let time = text.split(['T', 't', ' ']).nth(1).unwrap_or("");
    let digits = time
        .split_once('.')
        .map(|(_, frac)| frac.chars().take_while(char::is_ascii_digit).count())
        .unwrap_or(0);
    match digits {
        0 => SecondsFormat::AutoSi,
        1..=3 => SecondsFormat::Millis,
        4..=6 => SecondsFormat::Micros,
        _ => SecondsFormat::Nanos,
    }
}

/// Read a timestamp value as epoch milliseconds
pub fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.timestamp_millis()),
        _ => None,
    }
}

/// Turn a client `offset` into an absolute `timestamp`
///
/// Clients may send `offset` (ms before `sent_at`) instead of a timestamp.
/// Events that already carry a timestamp, or whose offset is not an integer
/// in range, are left as they are.
pub fn resolve_offset(event: &mut Value, sent_at: DateTime<Utc>) -> bool {
    let Value::Object(object) = event else {
        return false;
    };
    if object.contains_key("timestamp") {
        return false;
    }
    let Some(offset) = object.get("offset").and_then(Value::as_i64) else {
        return false;
    };
    let Some(at) = Duration::try_milliseconds(offset)
        .and_then(|offset| sent_at.checked_sub_signed(offset))
    else {
        return false;
    };

    object.remove("offset");
    object.insert(
        "timestamp".to_string(),
        Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    true
}

/// Earliest timestamp in a stream of events
///
/// Nested snapshot timestamps win when any exist, since they are what the
/// player lines up against; otherwise top-level event timestamps are used.
pub fn earliest_timestamp<'a>(events: impl IntoIterator<Item = &'a Value> + Clone) -> Option<i64> {
    let nested = events
        .clone()
        .into_iter()
        .flat_map(snapshot_items)
        .filter_map(|item| item.get("timestamp").and_then(timestamp_millis))
        .min();

    nested.or_else(|| {
        events
            .into_iter()
            .filter_map(|event| event.get("timestamp").and_then(timestamp_millis))
            .min()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shift_preserves_gaps() {
        let shift = TimeShift::new(86_400_000);
        let originals = [1_700_000_000_000i64, 1_700_000_000_250, 1_700_000_123_456];

        let shifted: Vec<i64> = originals.iter().map(|&t| shift.shift_millis(t).unwrap()).collect();
        for i in 0..originals.len() {
            for j in 0..originals.len() {
                assert_eq!(shifted[j] - shifted[i], originals[j] - originals[i]);
            }
        }
    }

    #[test]
    fn test_shift_integer_and_string() {
        let shift = TimeShift::new(1_500);

        let mut ms = json!(1_000);
        assert!(shift.shift_value(&mut ms));
        assert_eq!(ms, json!(2_500));

        let mut iso = json!("2024-05-01T10:00:00.000Z");
        assert!(shift.shift_value(&mut iso));
        assert_eq!(iso, json!("2024-05-01T10:00:01.500Z"));

        let mut offset = json!("2024-05-01T10:00:00+02:00");
        assert!(shift.shift_value(&mut offset));
        assert_eq!(offset, json!("2024-05-01T10:00:01.500+02:00"));

        let mut whole = json!("2024-05-01T10:00:00.000Z");
        TimeShift::new(60_000).shift_value(&mut whole);
        assert_eq!(whole, json!("2024-05-01T10:01:00.000Z"));

        let mut junk = json!("yesterday");
        assert!(!shift.shift_value(&mut junk));
        assert_eq!(junk, json!("yesterday"));
    }

    #[test]
    fn test_negative_shift() {
        let shift = TimeShift::between(10_000, DateTime::from_timestamp_millis(4_000).unwrap()).unwrap();
        assert_eq!(shift.delta_ms(), -6_000);
        assert_eq!(shift.shift_millis(10_500), Some(4_500));
    }

    #[test]
    fn test_out_of_range_values_are_left_alone() {
        let target = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        assert_eq!(TimeShift::between(i64::MIN, target), None);
        assert!(TimeShift::between(i64::MAX, target).is_some());

        let forward = TimeShift::new(1_000);
        let mut huge = json!(i64::MAX - 10);
        assert!(!forward.shift_value(&mut huge));
        assert_eq!(huge, json!(i64::MAX - 10));

        let backward = TimeShift::new(-1_000);
        let mut tiny = json!(i64::MIN + 10);
        assert!(!backward.shift_value(&mut tiny));
        assert_eq!(tiny, json!(i64::MIN + 10));

        let mut iso = json!("2024-05-01T10:00:00.000Z");
        assert!(!TimeShift::new(i64::MAX).shift_value(&mut iso));
        assert_eq!(iso, json!("2024-05-01T10:00:00.000Z"));
    }

    #[test]
    fn test_string_gap_preserved_exactly() {
        let shift = TimeShift::new(123_456_789);
        let mut a = json!("2024-05-01T10:00:00.123456Z");
        let mut b = json!("2024-05-01T10:00:07.654321Z");
        let gap = timestamp_millis(&b).unwrap() - timestamp_millis(&a).unwrap();

        shift.shift_value(&mut a);
        shift.shift_value(&mut b);
        assert_eq!(timestamp_millis(&b).unwrap() - timestamp_millis(&a).unwrap(), gap);
        assert!(a.as_str().unwrap().ends_with("456Z"));
    }

    #[test]
    fn test_offset_becomes_timestamp() {
        let sent_at = DateTime::from_timestamp_millis(1_700_000_001_000).unwrap();

        let mut event = json!({"event": "$pageview", "offset": 250});
        assert!(resolve_offset(&mut event, sent_at));
        assert!(event.get("offset").is_none());
        assert_eq!(event["timestamp"], "2023-11-14T22:13:20.750Z");
        assert_eq!(timestamp_millis(&event["timestamp"]), Some(1_700_000_000_750));

        let mut stamped = json!({"timestamp": 5, "offset": 250});
        assert!(!resolve_offset(&mut stamped, sent_at));
        assert_eq!(stamped, json!({"timestamp": 5, "offset": 250}));

        let mut wild = json!({"offset": i64::MIN});
        assert!(!resolve_offset(&mut wild, sent_at));
        assert_eq!(wild, json!({"offset": i64::MIN}));
    }

    #[test]
    fn test_earliest_prefers_snapshot_timestamps() {
        let events = vec![
            json!({"timestamp": "2024-05-01T10:00:00Z", "properties": {
                "$snapshot_data": [{"type": 4, "data": {}, "timestamp": 1_714_557_700_000i64}]
            }}),
            json!({"timestamp": "2024-05-01T09:00:00Z", "properties": {}}),
        ];
        assert_eq!(earliest_timestamp(&events), Some(1_714_557_700_000));

        let plain = vec![json!({"timestamp": 50}), json!({"timestamp": 20})];
        assert_eq!(earliest_timestamp(&plain), Some(20));
        assert_eq!(earliest_timestamp(&Vec::<Value>::new()), None);
    }
}
