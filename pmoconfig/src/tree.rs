//! Operations on the YAML tree backing a [`Config`](crate::Config)
//!
//! Keys are addressed by a path of segments (`["playdar", "server", "port"]`).
//! Every key stored in the tree is lower case, so lookups are case
//! insensitive.

use anyhow::{bail, Result};
use serde_yaml::{Mapping, Value};

/// Recursively lower-case every string key
pub(crate) fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, child)| {
                    let key = match key {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (key, lowercase_keys(child))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Overlay `overlay` onto `base`
///
/// Mappings are merged key by key; any other overlay value replaces the
/// base value, sequences included.
pub(crate) fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, child) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, child),
                    None => {
                        base_map.insert(key, child);
                    }
                }
            }
        }
        (slot, replacement) => *slot = replacement,
    }
}

/// Find the value at `path`
pub(crate) fn lookup<'a>(root: &'a Value, path: &[&str]) -> Result<&'a Value> {
    let mut node = root;
    for (depth, segment) in path.iter().enumerate() {
        let Value::Mapping(map) = node else {
            bail!("{} is not a section", path[..depth].join("."));
        };
        match map.get(segment.to_lowercase().as_str()) {
            Some(child) => node = child,
            None => bail!("{} is not set", path[..=depth].join(".")),
        }
    }
    Ok(node)
}

/// Store `value` at `path`, creating the intermediate sections
///
/// A scalar found where a section is needed is replaced by an empty one.
pub(crate) fn assign(root: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        let Value::Mapping(map) = node else {
            bail!("cannot descend into a non-mapping node");
        };
        let child = map
            .entry(Value::String(segment.to_lowercase()))
            .or_insert(Value::Mapping(Mapping::new()));
        if !child.is_mapping() {
            *child = Value::Mapping(Mapping::new());
        }
        node = child;
    }

    match node {
        Value::Mapping(map) => {
            map.insert(Value::String(last.to_lowercase()), value);
            Ok(())
        }
        _ => bail!("the configuration root is not a mapping"),
    }
}

/// Interpret an environment value as YAML (`8080`, `true`, `[a, b]`),
/// falling back to a plain string
pub(crate) fn parse_scalar(raw: &str) -> Value {
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
