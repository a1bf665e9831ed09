// src/capture/visitor.rs
//! Typed traversal over decoded payload trees
//!
//! Payloads are `serde_json::Value`, a tagged union of object, array and
//! scalar nodes. Visitors only see objects; arrays are traversed in order and
//! scalars are leaves. A visitor decides per object whether the walk descends
//! into its fields, which lets snapshot visitors stop at a recognized blob
//! instead of crawling DOM trees.

use serde_json::{Map, Value};

/// Whether the walk continues into the fields of the visited object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Descend,
    Skip,
}

/// Callback interface for [`walk_mut`]
pub trait PayloadVisitor {
    type Error;

    /// Called once per object node, before its fields are walked
    fn visit_object(&mut self, object: &mut Map<String, Value>) -> Result<Flow, Self::Error>;
}

/// Depth-first walk, parents before children, array order preserved
pub fn walk_mut<V: PayloadVisitor>(value: &mut Value, visitor: &mut V) -> Result<(), V::Error> {
    match value {
        Value::Object(object) => {
            if visitor.visit_object(object)? == Flow::Descend {
                for child in object.values_mut() {
                    walk_mut(child, visitor)?;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_mut(item, visitor)?;
            }
        }
        _ => {}
    }
    Ok(())
}
