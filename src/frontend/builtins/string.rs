use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;
use regex::Regex;

use super::{num_arg, render, str_arg};

/// String manipulation functions
pub fn create_upper_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(str_arg(&args, 0)?.to_uppercase())))
}

pub fn create_lower_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(str_arg(&args, 0)?.to_lowercase())))
}

pub fn create_title_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        let titled: Vec<String> = str_arg(&args, 0)?
            .split(' ')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect();
        Ok(Value::from(titled.join(" ")))
    })
}

/// `substr(string, offset, length)`; a length of -1 runs to the end.
pub fn create_substr_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let chars: Vec<char> = str_arg(&args, 0)?.chars().collect();
            let len = chars.len() as i64;
            let mut offset = num_arg(&args, 1)? as i64;
            let length = num_arg(&args, 2)? as i64;
            if offset < 0 {
                offset += len;
            }
            if offset < 0 || offset > len {
                return Err("offset out of range".to_string());
            }
            let end = if length < 0 {
                len
            } else {
                (offset + length).min(len)
            };
            Ok(Value::from(
                chars[offset as usize..end as usize].iter().collect::<String>(),
            ))
        })
}

pub fn create_startswith_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            Ok(Value::from(str_arg(&args, 0)?.starts_with(str_arg(&args, 1)?)))
        })
}

pub fn create_endswith_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(str_arg(&args, 0)?.ends_with(str_arg(&args, 1)?))))
}

pub fn create_trimspace_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(str_arg(&args, 0)?.trim())))
}

pub fn create_trimprefix_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let s = str_arg(&args, 0)?;
            let prefix = str_arg(&args, 1)?;
            Ok(Value::from(s.strip_prefix(prefix).unwrap_or(s)))
        })
}

pub fn create_trimsuffix_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let s = str_arg(&args, 0)?;
            let suffix = str_arg(&args, 1)?;
            Ok(Value::from(s.strip_suffix(suffix).unwrap_or(s)))
        })
}

/// `trim(string, cutset)` strips any of the characters in `cutset`.
pub fn create_trim_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let cutset: Vec<char> = str_arg(&args, 1)?.chars().collect();
            Ok(Value::from(
                str_arg(&args, 0)?.trim_matches(|c| cutset.contains(&c)),
            ))
        })
}

/// `replace(string, search, replacement)`; a search wrapped in slashes is a regex.
pub fn create_replace_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let s = str_arg(&args, 0)?;
            let search = str_arg(&args, 1)?;
            let to = str_arg(&args, 2)?;
            if search.len() > 1 && search.starts_with('/') && search.ends_with('/') {
                let re = Regex::new(&search[1..search.len() - 1]).map_err(|e| e.to_string())?;
                return Ok(Value::from(re.replace_all(s, to).into_owned()));
            }
            Ok(Value::from(s.replace(search, to)))
        })
}

/// `split(separator, string)`
pub fn create_split_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let separator = str_arg(&args, 0)?;
            let s = str_arg(&args, 1)?;
            if s.is_empty() {
                return Ok(Value::from(Vec::<Value>::new()));
            }
            let parts: Vec<Value> = s.split(separator).map(Value::from).collect();
            Ok(Value::from(parts))
        })
}

/// `join(separator, list...)`
pub fn create_join_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::array_of(ParamType::Any))
        .build(|args: FuncArgs| {
            let separator = str_arg(&args, 0)?;
            let mut parts = Vec::new();
            for list in args.iter().skip(1) {
                for item in list.as_array().into_iter().flatten() {
                    parts.push(render(item)?);
                }
            }
            Ok(Value::from(parts.join(separator)))
        })
}

/// `format(spec, values...)` supporting `%s`, `%d`, `%v` and `%%`.
pub fn create_format_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| {
            let spec = str_arg(&args, 0)?;
            format_values(spec, args.iter().skip(1)).map(Value::from)
        })
}

fn format_values<'v>(spec: &str, values: impl IntoIterator<Item = &'v Value>) -> Result<String, String> {
    let mut values = values.into_iter();
    let mut out = String::new();
    let mut chars = spec.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') | Some('d') | Some('v') => {
                let v = values
                    .next()
                    .ok_or_else(|| "not enough arguments for format".to_string())?;
                out.push_str(&render(v)?);
            }
            Some(other) => return Err(format!("unsupported format verb %{other}")),
            None => return Err("trailing % in format".to_string()),
        }
    }
    Ok(out)
}

/// `regex(pattern, string)` returns the first match, or the capture groups
/// when the pattern has any.
pub fn create_regex_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let re = Regex::new(str_arg(&args, 0)?).map_err(|e| e.to_string())?;
            let s = str_arg(&args, 1)?;
            let caps = re
                .captures(s)
                .ok_or_else(|| "pattern did not match".to_string())?;
            if caps.len() == 1 {
                return Ok(Value::from(&caps[0]));
            }
            let groups: Vec<Value> = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| Value::from(m.as_str())).unwrap_or(Value::Null))
                .collect();
            Ok(Value::from(groups))
        })
}

/// `regexall(pattern, string)`: every match, each shaped like `regex` would
/// return it.
pub fn create_regexall_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let re = Regex::new(str_arg(&args, 0)?).map_err(|e| e.to_string())?;
            let matches: Vec<Value> = re
                .captures_iter(str_arg(&args, 1)?)
                .map(|caps| {
                    if caps.len() == 1 {
                        return Value::from(&caps[0]);
                    }
                    Value::from(
                        caps.iter()
                            .skip(1)
                            .map(|m| m.map(|m| Value::from(m.as_str())).unwrap_or(Value::Null))
                            .collect::<Vec<_>>(),
                    )
                })
                .collect();
            Ok(Value::from(matches))
        })
}

/// `format` applied element-wise. List arguments must share one length;
/// scalars repeat on every line.
pub fn create_formatlist_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .variadic_param(ParamType::Any)
        .build(|args: FuncArgs| {
            let spec = str_arg(&args, 0)?;
            let mut len = None;
            for arg in args.iter().skip(1) {
                if let Value::Array(items) = arg {
                    match len {
                        Some(n) if n != items.len() => {
                            return Err("formatlist lists must all have the same length".to_string())
                        }
                        _ => len = Some(items.len()),
                    }
                }
            }
            let mut lines = Vec::new();
            for i in 0..len.unwrap_or(1) {
                let row: Vec<&Value> = args
                    .iter()
                    .skip(1)
                    .map(|arg| match arg {
                        Value::Array(items) => &items[i],
                        other => other,
                    })
                    .collect();
                lines.push(Value::from(format_values(spec, row)?));
            }
            Ok(Value::from(lines))
        })
}

/// Strip trailing newlines.
pub fn create_chomp_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(str_arg(&args, 0)?.trim_end_matches(['\n', '\r'])))
    })
}

/// `indent(spaces, string)` indents every line but the first.
pub fn create_indent_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .param(ParamType::String)
        .build(|args: FuncArgs| {
            let pad = " ".repeat(num_arg(&args, 0)?.max(0.0) as usize);
            Ok(Value::from(
                str_arg(&args, 1)?.replace('\n', &format!("\n{pad}")),
            ))
        })
}

pub fn create_strrev_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .build(|args: FuncArgs| Ok(Value::from(str_arg(&args, 0)?.chars().rev().collect::<String>())))
}
