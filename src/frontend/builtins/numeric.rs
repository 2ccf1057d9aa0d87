use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;

use super::{num_arg, number, str_arg};

fn fold_numbers(args: &FuncArgs, pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    let mut acc: Option<f64> = None;
    for (idx, _) in args.iter().enumerate() {
        let n = num_arg(args, idx)?;
        acc = Some(match acc {
            Some(a) => pick(a, n),
            None => n,
        });
    }
    acc.map(number)
        .ok_or_else(|| "at least one number is required".to_string())
}

/// Smallest of the given numbers
pub fn create_min_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| fold_numbers(&args, f64::min))
}

/// Largest of the given numbers
pub fn create_max_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .variadic_param(ParamType::Number)
        .build(|args: FuncArgs| fold_numbers(&args, f64::max))
}

pub fn create_abs_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(number(num_arg(&args, 0)?.abs())))
}

pub fn create_ceil_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(number(num_arg(&args, 0)?.ceil())))
}

pub fn create_floor_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(number(num_arg(&args, 0)?.floor())))
}

/// `parseint(string, base)` for bases 2 through 36
pub fn create_parseint_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::String)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let s = str_arg(&args, 0)?;
            let base = num_arg(&args, 1)? as u32;
            if !(2..=36).contains(&base) {
                return Err(format!("invalid base {base}"));
            }
            i64::from_str_radix(s, base)
                .map(Value::from)
                .map_err(|e| format!("cannot parse {s:?} in base {base}: {e}"))
        })
}

/// -1, 0 or 1 following the sign of the argument
pub fn create_signum_func() -> FuncDef {
    FuncDef::builder().param(ParamType::Number).build(|args: FuncArgs| {
        let n = num_arg(&args, 0)?;
        Ok(number(if n == 0.0 { 0.0 } else { n.signum() }))
    })
}

pub fn create_pow_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| Ok(number(num_arg(&args, 0)?.powf(num_arg(&args, 1)?))))
}

/// `log(number, base)`
pub fn create_log_func() -> FuncDef {
    FuncDef::builder()
        .param(ParamType::Number)
        .param(ParamType::Number)
        .build(|args: FuncArgs| {
            let result = num_arg(&args, 0)?.log(num_arg(&args, 1)?);
            if result.is_finite() {
                Ok(number(result))
            } else {
                Err("logarithm is not a finite number".to_string())
            }
        })
}
