use anyhow::{bail, Result};
use hcl::Value;

use super::block::Instance;

/// Iterate a resource or module `for_each` collection as `(key, value)`
/// pairs.
///
/// Objects yield their keys. Arrays act as sets of strings: numbers and
/// bools are converted, each element is its own key and duplicates are
/// visited once. Arrays holding anything else cannot be keyed.
pub fn for_each_iter<F>(collection: &Value, f: &mut F) -> Result<()>
where
    F: FnMut(Value, Value) -> Result<()>,
{
    match collection {
        Value::Array(arr) => {
            let mut seen = Vec::with_capacity(arr.len());
            for v in arr {
                let key = match v {
                    Value::String(_) | Value::Number(_) | Value::Bool(_) => key_segment(v),
                    other => bail!(
                        "for_each over a list needs strings to use as keys, got {other:?}; use a map instead"
                    ),
                };
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key.clone());
                f(Value::from(key.clone()), Value::from(key))?;
            }
        }
        Value::Object(obj) => {
            for (k, v) in obj.iter() {
                f(Value::String(k.clone()), v.clone())?;
            }
        }
        other => bail!("for_each expects array or object, got {other:?}"),
    }
    Ok(())
}

/// Collect the instances a `for_each` value expands into.
pub fn instances(collection: &Value) -> Result<Vec<Instance>> {
    let mut out = Vec::new();
    for_each_iter(collection, &mut |key, value| {
        out.push(Instance::Each { key, value });
        Ok(())
    })?;
    Ok(out)
}

/// Instances of a `dynamic` block. Unlike resources these may iterate any
/// list: a list of strings is keyed by its elements, other lists by
/// position.
pub fn dynamic_instances(collection: &Value) -> Result<Vec<Instance>> {
    match collection {
        Value::Array(arr) if !arr.iter().all(|v| matches!(v, Value::String(_))) => Ok(arr
            .iter()
            .enumerate()
            .map(|(i, v)| Instance::Each {
                key: Value::from(i as u64),
                value: v.clone(),
            })
            .collect()),
        Value::Array(arr) => Ok(arr
            .iter()
            .map(|v| Instance::Each {
                key: v.clone(),
                value: v.clone(),
            })
            .collect()),
        other => instances(other),
    }
}

/// Key under which an instance's values are stored in the context.
pub fn key_segment(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => format!("{other:?}"),
    }
}
