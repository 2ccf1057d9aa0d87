use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;
use std::path::Path;

use super::str_arg;

pub fn create_basename_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        let name = Path::new(str_arg(&args, 0)?)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Value::from(name))
    })
}

pub fn create_dirname_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        let dir = match Path::new(str_arg(&args, 0)?).parent() {
            Some(p) if p.as_os_str().is_empty() => ".".to_string(),
            Some(p) => p.to_string_lossy().into_owned(),
            None => ".".to_string(),
        };
        Ok(Value::from(dir))
    })
}

/// Expand a leading `~` to the home directory when one is known.
pub fn create_pathexpand_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        let path = str_arg(&args, 0)?;
        let home = std::env::var("HOME").ok();
        let expanded = match (path.strip_prefix('~'), home) {
            (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
                format!("{home}{rest}")
            }
            _ => path.to_string(),
        };
        Ok(Value::from(expanded))
    })
}
