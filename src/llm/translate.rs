//! Projection of tool descriptors into a backend's declaration set.

use serde_json::{Map, Value};
use tracing::warn;

use super::ModelBackend;
use crate::error::{BridgeError, BridgeResult};
use crate::types::ToolDescriptor;

/// Declarations for one round, plus the descriptors that made it through.
///
/// `available` is what the invoker may dispatch: a tool rejected here is
/// neither offered to the model nor callable.
#[derive(Debug)]
pub struct DeclarationSet<D> {
    pub declarations: Vec<D>,
    pub available: Vec<ToolDescriptor>,
    pub rejected: Vec<BridgeError>,
}

/// Translate every descriptor, omitting (and logging) unsupported ones.
pub fn translate<B>(backend: &B, descriptors: &[ToolDescriptor]) -> DeclarationSet<B::Declaration>
where
    B: ModelBackend + ?Sized,
{
    let mut set = DeclarationSet {
        declarations: Vec::with_capacity(descriptors.len()),
        available: Vec::with_capacity(descriptors.len()),
        rejected: Vec::new(),
    };

    for descriptor in descriptors {
        match backend.declare(descriptor) {
            Ok(declaration) => {
                set.declarations.push(declaration);
                set.available.push(descriptor.clone());
            }
            Err(e) => {
                warn!("Omitting tool '{}': {}", descriptor.name, e);
                set.rejected.push(e);
            }
        }
    }

    set
}

/// Require an object-typed root schema.
pub fn require_object_root(
    descriptor: &ToolDescriptor,
    backend: &'static str,
) -> BridgeResult<()> {
    let unsupported = |reason: String| BridgeError::UnsupportedSchema {
        tool: descriptor.name.clone(),
        backend,
        reason,
    };

    let Value::Object(root) = &descriptor.input_schema else {
        return Err(unsupported("input schema is not a JSON object".into()));
    };
    match root.get("type") {
        None => Ok(()),
        Some(Value::String(t)) if t == "object" => Ok(()),
        Some(other) => Err(unsupported(format!(
            "root schema type must be \"object\", found {other}"
        ))),
    }
}

/// Find the first keyword from `forbidden` used in a schema position.
///
/// Property and definition names are not keywords. Returns the keyword and
/// a JSON pointer to where it sits.
pub fn find_keyword(schema: &Value, forbidden: &[&str]) -> Option<(String, String)> {
    find_in_schema(schema, &mut |map| {
        map.keys().find(|k| forbidden.contains(&k.as_str())).cloned()
    })
}

/// Visit every subschema depth first and stop at the first one `check`
/// objects to, returning the objection and a JSON pointer to the subschema.
///
/// Descends through `properties`, `$defs`, `items`, `anyOf`, `oneOf` and
/// object-valued `additionalProperties`.
pub fn find_in_schema<F>(schema: &Value, check: &mut F) -> Option<(String, String)>
where
    F: FnMut(&Map<String, Value>) -> Option<String>,
{
    walk(schema, check, String::new())
}

fn walk<F>(schema: &Value, check: &mut F, pointer: String) -> Option<(String, String)>
where
    F: FnMut(&Map<String, Value>) -> Option<String>,
{
    let Value::Object(map) = schema else {
        return None;
    };

    if let Some(objection) = check(map) {
        let at = if pointer.is_empty() { "/".to_string() } else { pointer };
        return Some((objection, at));
    }

    for container in ["properties", "$defs"] {
        if let Some(Value::Object(named)) = map.get(container) {
            for (name, sub) in named {
                let p = format!("{}/{}/{}", pointer, container, escape_pointer(name));
                if let Some(found) = walk(sub, check, p) {
                    return Some(found);
                }
            }
        }
    }

    match map.get("items") {
        Some(Value::Array(items)) => {
            for (i, sub) in items.iter().enumerate() {
                if let Some(found) = walk(sub, check, format!("{pointer}/items/{i}")) {
                    return Some(found);
                }
            }
        }
        Some(sub) => {
            if let Some(found) = walk(sub, check, format!("{pointer}/items")) {
                return Some(found);
            }
        }
        None => {}
    }

    for combinator in ["anyOf", "oneOf"] {
        if let Some(Value::Array(options)) = map.get(combinator) {
            for (i, sub) in options.iter().enumerate() {
                if let Some(found) = walk(sub, check, format!("{pointer}/{combinator}/{i}")) {
                    return Some(found);
                }
            }
        }
    }

    if let Some(sub @ Value::Object(_)) = map.get("additionalProperties") {
        if let Some(found) = walk(sub, check, format!("{pointer}/additionalProperties")) {
            return Some(found);
        }
    }

    None
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}
