// src/repair.rs

//! DOM repair for snapshot trees
//!
//! Some captured snapshots contain element nodes without an `attributes`
//! map, which the ingestion side rejects. Repair gives every element node
//! (`type == 2`) an empty map when it has none. Nothing else is touched, so
//! repairing an already repaired tree is a no-op.

use crate::capture::SnapshotKind;
use serde_json::{Map, Value};
use tracing::debug;

/// rrweb serialized node type for elements
pub const ELEMENT_NODE: i64 = 2;

/// Repair a DOM node and all of its descendants
///
/// Returns the number of nodes that received an attributes map. Walks with
/// an explicit stack so deeply nested documents cannot overflow.
pub fn repair_node(root: &mut Value) -> usize {
    let mut fixed = 0;
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        let Value::Object(object) = node else {
            continue;
        };

        let is_element = object.get("type").and_then(Value::as_i64) == Some(ELEMENT_NODE);
        let has_attributes = matches!(object.get("attributes"), Some(v) if !v.is_null());
        if is_element && !has_attributes {
            object.insert("attributes".to_string(), Value::Object(Map::new()));
            fixed += 1;
        }

        if let Some(Value::Array(children)) = object.get_mut("childNodes") {
            stack.extend(children.iter_mut().rev());
        }
    }

    fixed
}

/// Repair the DOM trees carried by one snapshot event
///
/// Full snapshots carry a tree under `data.node`; mutations carry one per
/// entry of `data.adds`. Blobs that are still compressed strings are skipped.
pub fn repair_snapshot(snapshot: &mut Map<String, Value>) -> usize {
    let Some(kind) = SnapshotKind::classify(snapshot) else {
        return 0;
    };
    let Some(Value::Object(data)) = snapshot.get_mut("data") else {
        return 0;
    };

    let fixed = match kind {
        SnapshotKind::Full => data.get_mut("node").map(repair_node).unwrap_or(0),
        kind if kind.is_mutation() => match data.get_mut("adds") {
            Some(Value::Array(adds)) => adds
                .iter_mut()
                .filter_map(|add| add.get_mut("node"))
                .map(repair_node)
                .sum(),
            _ => 0,
        },
        _ => 0,
    };

    if fixed > 0 {
        debug!("Repaired {} element nodes missing attributes", fixed);
    }
    fixed
}
