use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;

use super::{kind_of, number, render};

pub fn create_tostring_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match args.first() {
            Some(Value::Null) => Ok(Value::Null),
            Some(v) => render(v).map(Value::from),
            None => Err("tostring requires an argument".to_string()),
        })
}

pub fn create_tonumber_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match args.first() {
            Some(Value::Number(n)) => Ok(Value::Number(n.clone())),
            Some(Value::Null) => Ok(Value::Null),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(number)
                .map_err(|_| format!("cannot convert {s:?} to number")),
            Some(other) => Err(format!("cannot convert {} to number", kind_of(other))),
            None => Err("tonumber requires an argument".to_string()),
        })
}

pub fn create_tobool_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match args.first() {
            Some(Value::Bool(b)) => Ok(Value::from(*b)),
            Some(Value::Null) => Ok(Value::Null),
            Some(Value::String(s)) if s == "true" => Ok(Value::from(true)),
            Some(Value::String(s)) if s == "false" => Ok(Value::from(false)),
            Some(other) => Err(format!("cannot convert {} to bool", kind_of(other))),
            None => Err("tobool requires an argument".to_string()),
        })
}

/// Lists pass through; maps become the list of their values.
pub fn create_tolist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match args.first() {
            Some(Value::Array(items)) => Ok(Value::from(items.clone())),
            Some(Value::Object(map)) => Ok(Value::from(map.values().cloned().collect::<Vec<_>>())),
            Some(other) => Err(format!("cannot convert {} to list", kind_of(other))),
            None => Err("tolist requires an argument".to_string()),
        })
}

/// A set is modelled as a de-duplicated list.
pub fn create_toset_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let mut out: Vec<Value> = Vec::new();
            for v in args.first().and_then(|v| v.as_array()).into_iter().flatten() {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Ok(Value::from(out))
        })
}

pub fn create_tomap_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Any)
        .build(|args: FuncArgs| match args.first() {
            Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
            Some(other) => Err(format!("cannot convert {} to map", kind_of(other))),
            None => Err("tomap requires an argument".to_string()),
        })
}
