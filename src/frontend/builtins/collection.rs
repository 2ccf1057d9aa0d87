use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::value::Map;
use hcl::Value;

use super::{kind_of, num_arg, render, str_arg};

fn array_arg(args: &FuncArgs, idx: usize) -> Result<&Vec<Value>, String> {
    args.get(idx)
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("argument {idx} must be a list"))
}

fn object_arg(args: &FuncArgs, idx: usize) -> Result<&Map<String, Value>, String> {
    args.get(idx)
        .and_then(|v| v.as_object())
        .ok_or_else(|| format!("argument {idx} must be a map"))
}

/// Length of a string, list or map
pub fn create_length_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match args.first() {
            Some(Value::String(s)) => Ok(Value::from(s.chars().count() as u64)),
            Some(Value::Array(items)) => Ok(Value::from(items.len() as u64)),
            Some(Value::Object(map)) => Ok(Value::from(map.len() as u64)),
            Some(other) => Err(format!("cannot take the length of {}", kind_of(other))),
            None => Err("length requires an argument".to_string()),
        })
}

/// First argument that is neither null nor an empty string
pub fn create_coalesce_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| {
            args.iter()
                .find(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
                .cloned()
                .ok_or_else(|| "no non-null arguments".to_string())
        })
}

/// Drop empty strings and nulls from a list
pub fn create_compact_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let kept: Vec<Value> = array_arg(&args, 0)?
                .iter()
                .filter(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
                .cloned()
                .collect();
            Ok(Value::from(kept))
        })
}

/// Concatenate multiple lists into one
pub fn create_concat_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .variadic_param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut result = Vec::new();
            for idx in 0..args.len() {
                result.extend(array_arg(&args, idx)?.iter().cloned());
            }
            Ok(Value::from(result))
        })
}

pub fn create_contains_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::Any)
        .build(|args: FuncArgs| {
            let needle = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(Value::from(array_arg(&args, 0)?.contains(&needle)))
        })
}

/// Remove duplicates keeping the first occurrence
pub fn create_distinct_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut result: Vec<Value> = Vec::new();
            for v in array_arg(&args, 0)? {
                if !result.contains(v) {
                    result.push(v.clone());
                }
            }
            Ok(Value::from(result))
        })
}

/// `element(list, index)` wraps around the end of the list
pub fn create_element_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let items = array_arg(&args, 0)?;
            if items.is_empty() {
                return Err("cannot use element on an empty list".to_string());
            }
            let idx = num_arg(&args, 1)?;
            if idx < 0.0 {
                return Err("index must not be negative".to_string());
            }
            Ok(items[(idx as usize) % items.len()].clone())
        })
}

pub fn create_flatten_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            fn flatten(values: &[Value], out: &mut Vec<Value>) {
                for v in values {
                    match v.as_array() {
                        Some(inner) => flatten(inner, out),
                        None => out.push(v.clone()),
                    }
                }
            }

            let mut result = Vec::new();
            flatten(array_arg(&args, 0)?, &mut result);
            Ok(Value::from(result))
        })
}

/// Keys of a map in lexical order
pub fn create_keys_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| {
            let mut keys: Vec<&String> = object_arg(&args, 0)?.keys().collect();
            keys.sort();
            Ok(Value::from(
                keys.into_iter().map(|k| Value::from(k.as_str())).collect::<Vec<_>>(),
            ))
        })
}

/// Values of a map ordered by their keys
pub fn create_values_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| {
            let map = object_arg(&args, 0)?;
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let values: Vec<Value> = keys
                .into_iter()
                .filter_map(|k| map.get(k).cloned())
                .collect();
            Ok(Value::from(values))
        })
}

/// `lookup(map, key, default)`
pub fn create_lookup_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| {
            let map = object_arg(&args, 0)?;
            let key = str_arg(&args, 1)?;
            match (map.get(key), args.get(2)) {
                (Some(v), _) => Ok(v.clone()),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(format!("key {key:?} not found")),
            }
        })
}

/// Shallow merge of maps; later arguments win
pub fn create_merge_func() -> FuncDef {
    FuncDef::builder()
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| {
            let mut merged = Map::new();
            for (idx, arg) in args.iter().enumerate() {
                if matches!(arg, Value::Null) {
                    continue;
                }
                for (k, v) in object_arg(&args, idx)? {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Object(merged))
        })
}

/// `range(limit)`, `range(start, limit)` or `range(start, limit, step)`
pub fn create_range_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| {
            let (start, limit, step) = match args.len() {
                1 => (0.0, num_arg(&args, 0)?, 1.0),
                2 => (num_arg(&args, 0)?, num_arg(&args, 1)?, 1.0),
                3 => (num_arg(&args, 0)?, num_arg(&args, 1)?, num_arg(&args, 2)?),
                n => return Err(format!("range takes 1 to 3 arguments, got {n}")),
            };
            if step == 0.0 {
                return Err("step must not be zero".to_string());
            }
            let mut out = Vec::new();
            let mut current = start;
            while (step > 0.0 && current < limit) || (step < 0.0 && current > limit) {
                out.push(super::number(current));
                current += step;
                if out.len() > 1024 {
                    return Err("range produces more than 1024 elements".to_string());
                }
            }
            Ok(Value::from(out))
        })
}

pub fn create_reverse_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut items = array_arg(&args, 0)?.clone();
            items.reverse();
            Ok(Value::from(items))
        })
}

/// Slice from start (inclusive) to end (exclusive)
pub fn create_slice_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let items = array_arg(&args, 0)?;
            let start = num_arg(&args, 1)? as usize;
            let end = num_arg(&args, 2)? as usize;
            if start > end || end > items.len() {
                return Err("slice indices out of range".to_string());
            }
            Ok(Value::from(items[start..end].to_vec()))
        })
}

/// Lexical sort of a list of strings
pub fn create_sort_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut items = array_arg(&args, 0)?
                .iter()
                .map(render)
                .collect::<Result<Vec<_>, _>>()?;
            items.sort();
            Ok(Value::from(
                items.into_iter().map(Value::from).collect::<Vec<_>>(),
            ))
        })
}

/// Build a map from a list of keys and a list of values
pub fn create_zipmap_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let keys = array_arg(&args, 0)?;
            let values = array_arg(&args, 1)?;
            if keys.len() != values.len() {
                return Err("keys and values must have the same length".to_string());
            }
            let mut map = Map::new();
            for (k, v) in keys.iter().zip(values) {
                map.insert(render(k)?, v.clone());
            }
            Ok(Value::Object(map))
        })
}

/// The single element of a list, or null for an empty one
pub fn create_one_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let items = array_arg(&args, 0)?;
            match items.as_slice() {
                [] => Ok(Value::Null),
                [only] => Ok(only.clone()),
                _ => Err("list must have at most one element".to_string()),
            }
        })
}

/// First argument that is a non-empty list
pub fn create_coalescelist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .variadic_param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            for idx in 0..args.len() {
                let items = array_arg(&args, idx)?;
                if !items.is_empty() {
                    return Ok(Value::from(items.clone()));
                }
            }
            Err("no non-empty list arguments".to_string())
        })
}

/// `chunklist(list, size)`; a size of zero keeps the list whole.
pub fn create_chunklist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let items = array_arg(&args, 0)?;
            let size = num_arg(&args, 1)?;
            if size < 0.0 {
                return Err("chunk size must not be negative".to_string());
            }
            if size == 0.0 {
                return Ok(Value::from(vec![Value::from(items.clone())]));
            }
            let chunks: Vec<Value> = items
                .chunks(size as usize)
                .map(|chunk| Value::from(chunk.to_vec()))
                .collect();
            Ok(Value::from(chunks))
        })
}

/// `matchkeys(values, keys, searchset)` keeps the values whose key at the
/// same index is in the search set.
pub fn create_matchkeys_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let values = array_arg(&args, 0)?;
            let keys = array_arg(&args, 1)?;
            let search = array_arg(&args, 2)?;
            if values.len() != keys.len() {
                return Err("values and keys must have the same length".to_string());
            }
            let kept: Vec<Value> = values
                .iter()
                .zip(keys)
                .filter(|(_, key)| search.contains(key))
                .map(|(value, _)| value.clone())
                .collect();
            Ok(Value::from(kept))
        })
}

/// Swap the keys and values of a map of string lists.
pub fn create_transpose_func() -> FuncDef {
    FuncDef::builder().param(ParamType::Any).build(|args: FuncArgs| {
        let mut swapped: std::collections::BTreeMap<String, Vec<String>> = Default::default();
        for (key, list) in object_arg(&args, 0)? {
            let list = list
                .as_array()
                .ok_or_else(|| format!("value of {key:?} must be a list"))?;
            for item in list {
                swapped.entry(render(item)?).or_default().push(key.clone());
            }
        }
        let mut out = Map::new();
        for (key, mut list) in swapped {
            list.sort();
            out.insert(key, Value::from(list.into_iter().map(Value::from).collect::<Vec<_>>()));
        }
        Ok(Value::Object(out))
    })
}

/// Sets are lists without duplicates, in order of first appearance.
fn set_args(args: &FuncArgs) -> Result<Vec<Vec<Value>>, String> {
    (0..args.len())
        .map(|idx| {
            let mut set: Vec<Value> = Vec::new();
            for v in array_arg(args, idx)? {
                if !set.contains(v) {
                    set.push(v.clone());
                }
            }
            Ok(set)
        })
        .collect()
}

pub fn create_setunion_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .variadic_param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut union: Vec<Value> = Vec::new();
            for v in set_args(&args)?.into_iter().flatten() {
                if !union.contains(&v) {
                    union.push(v);
                }
            }
            Ok(Value::from(union))
        })
}

pub fn create_setintersection_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .variadic_param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut sets = set_args(&args)?.into_iter();
            let first = sets.next().unwrap_or_default();
            let rest: Vec<Vec<Value>> = sets.collect();
            let common: Vec<Value> = first
                .into_iter()
                .filter(|v| rest.iter().all(|set| set.contains(v)))
                .collect();
            Ok(Value::from(common))
        })
}

pub fn create_setsubtract_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let sets = set_args(&args)?;
            let (Some(a), Some(b)) = (sets.first(), sets.get(1)) else {
                return Err("setsubtract takes two sets".to_string());
            };
            let left: Vec<Value> = a.iter().filter(|v| !b.contains(v)).cloned().collect();
            Ok(Value::from(left))
        })
}

/// Every combination taking one element from each argument.
pub fn create_setproduct_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .variadic_param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut product: Vec<Vec<Value>> = vec![Vec::new()];
            for idx in 0..args.len() {
                let items = array_arg(&args, idx)?;
                product = product
                    .into_iter()
                    .flat_map(|prefix| {
                        items.iter().map(move |item| {
                            let mut row = prefix.clone();
                            row.push(item.clone());
                            row
                        })
                    })
                    .collect();
            }
            Ok(Value::from(product.into_iter().map(Value::from).collect::<Vec<_>>()))
        })
}
