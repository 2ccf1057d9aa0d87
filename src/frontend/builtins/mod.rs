// Terraform-compatible builtin functions, grouped by category

pub mod collection;
pub mod conversion;
pub mod crypto;
pub mod datetime;
pub mod encoding;
pub mod filesystem;
pub mod network;
pub mod numeric;
pub mod path;
pub mod string;

use hcl::eval::Context;
use hcl::{Number, Value};

/// Create a context with every builtin function declared
pub fn create_context() -> Context<'static> {
    let mut ctx = Context::new();

    // String functions
    ctx.declare_func("upper", string::create_upper_func());
    ctx.declare_func("lower", string::create_lower_func());
    ctx.declare_func("title", string::create_title_func());
    ctx.declare_func("substr", string::create_substr_func());
    ctx.declare_func("startswith", string::create_startswith_func());
    ctx.declare_func("endswith", string::create_endswith_func());
    ctx.declare_func("trimspace", string::create_trimspace_func());
    ctx.declare_func("trimprefix", string::create_trimprefix_func());
    ctx.declare_func("trimsuffix", string::create_trimsuffix_func());
    ctx.declare_func("trim", string::create_trim_func());
    ctx.declare_func("replace", string::create_replace_func());
    ctx.declare_func("split", string::create_split_func());
    ctx.declare_func("join", string::create_join_func());
    ctx.declare_func("format", string::create_format_func());
    ctx.declare_func("regex", string::create_regex_func());
    ctx.declare_func("regexall", string::create_regexall_func());
    ctx.declare_func("formatlist", string::create_formatlist_func());
    ctx.declare_func("chomp", string::create_chomp_func());
    ctx.declare_func("indent", string::create_indent_func());
    ctx.declare_func("strrev", string::create_strrev_func());

    // Numeric functions
    ctx.declare_func("min", numeric::create_min_func());
    ctx.declare_func("max", numeric::create_max_func());
    ctx.declare_func("abs", numeric::create_abs_func());
    ctx.declare_func("ceil", numeric::create_ceil_func());
    ctx.declare_func("floor", numeric::create_floor_func());
    ctx.declare_func("parseint", numeric::create_parseint_func());
    ctx.declare_func("signum", numeric::create_signum_func());
    ctx.declare_func("pow", numeric::create_pow_func());
    ctx.declare_func("log", numeric::create_log_func());

    // Collection functions
    ctx.declare_func("length", collection::create_length_func());
    ctx.declare_func("coalesce", collection::create_coalesce_func());
    ctx.declare_func("compact", collection::create_compact_func());
    ctx.declare_func("concat", collection::create_concat_func());
    ctx.declare_func("contains", collection::create_contains_func());
    ctx.declare_func("distinct", collection::create_distinct_func());
    ctx.declare_func("element", collection::create_element_func());
    ctx.declare_func("flatten", collection::create_flatten_func());
    ctx.declare_func("keys", collection::create_keys_func());
    ctx.declare_func("values", collection::create_values_func());
    ctx.declare_func("lookup", collection::create_lookup_func());
    ctx.declare_func("merge", collection::create_merge_func());
    ctx.declare_func("range", collection::create_range_func());
    ctx.declare_func("reverse", collection::create_reverse_func());
    ctx.declare_func("slice", collection::create_slice_func());
    ctx.declare_func("sort", collection::create_sort_func());
    ctx.declare_func("zipmap", collection::create_zipmap_func());
    ctx.declare_func("one", collection::create_one_func());
    ctx.declare_func("coalescelist", collection::create_coalescelist_func());
    ctx.declare_func("chunklist", collection::create_chunklist_func());
    ctx.declare_func("matchkeys", collection::create_matchkeys_func());
    ctx.declare_func("transpose", collection::create_transpose_func());
    ctx.declare_func("setunion", collection::create_setunion_func());
    ctx.declare_func("setintersection", collection::create_setintersection_func());
    ctx.declare_func("setsubtract", collection::create_setsubtract_func());
    ctx.declare_func("setproduct", collection::create_setproduct_func());

    // Type conversion
    ctx.declare_func("tostring", conversion::create_tostring_func());
    ctx.declare_func("tonumber", conversion::create_tonumber_func());
    ctx.declare_func("tobool", conversion::create_tobool_func());
    ctx.declare_func("tolist", conversion::create_tolist_func());
    ctx.declare_func("toset", conversion::create_toset_func());
    ctx.declare_func("tomap", conversion::create_tomap_func());

    // Encoding
    ctx.declare_func("base64encode", encoding::create_base64encode_func());
    ctx.declare_func("base64decode", encoding::create_base64decode_func());
    ctx.declare_func("jsonencode", encoding::create_jsonencode_func());
    ctx.declare_func("jsondecode", encoding::create_jsondecode_func());
    ctx.declare_func("yamlencode", encoding::create_yamlencode_func());
    ctx.declare_func("yamldecode", encoding::create_yamldecode_func());
    ctx.declare_func("csvdecode", encoding::create_csvdecode_func());
    ctx.declare_func("urlencode", encoding::create_urlencode_func());

    // Hashing
    ctx.declare_func("md5", crypto::create_md5_func());
    ctx.declare_func("sha256", crypto::create_sha256_func());
    ctx.declare_func("sha512", crypto::create_sha512_func());
    ctx.declare_func("sha1", crypto::create_sha1_func());
    ctx.declare_func("base64sha256", crypto::create_base64sha256_func());
    ctx.declare_func("base64sha512", crypto::create_base64sha512_func());
    ctx.declare_func("uuid", crypto::create_uuid_func());

    // Networking
    ctx.declare_func("cidrhost", network::create_cidrhost_func());
    ctx.declare_func("cidrnetmask", network::create_cidrnetmask_func());
    ctx.declare_func("cidrsubnet", network::create_cidrsubnet_func());
    ctx.declare_func("cidrsubnets", network::create_cidrsubnets_func());

    // Time
    ctx.declare_func("timestamp", datetime::create_timestamp_func());
    ctx.declare_func("timeadd", datetime::create_timeadd_func());
    ctx.declare_func("formatdate", datetime::create_formatdate_func());

    // Paths. File reading functions live in `filesystem` and are inlined
    // by the attribute that calls them.
    ctx.declare_func("basename", path::create_basename_func());
    ctx.declare_func("dirname", path::create_dirname_func());
    ctx.declare_func("pathexpand", path::create_pathexpand_func());

    ctx
}

pub(crate) fn str_arg(args: &[Value], idx: usize) -> Result<&str, String> {
    args.get(idx)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("argument {idx} must be a string"))
}

pub(crate) fn num_arg(args: &[Value], idx: usize) -> Result<f64, String> {
    args.get(idx)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| format!("argument {idx} must be a number"))
}

/// Integral floats come back as integers so `count = ceil(x)` stays usable.
pub(crate) fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Render a primitive value the way string interpolation would.
pub(crate) fn render(v: &Value) -> Result<String, String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(format!("cannot convert {} to string", kind_of(other))),
    }
}

pub(crate) fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub(crate) fn eval_str(src: &str) -> Result<Value, String> {
    use hcl::eval::Evaluate;
    let body: hcl::Body = hcl::from_str(&format!("test = {src}")).map_err(|e| e.to_string())?;
    let expr = body
        .attributes()
        .find(|a| a.key() == "test")
        .map(|a| a.expr().clone())
        .ok_or_else(|| "missing attribute".to_string())?;
    expr.evaluate(&create_context()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_functions_registered() {
        let calls = [
            "upper(\"a\")",
            "length([1, 2])",
            "merge({a = 1}, {b = 2})",
            "jsonencode({a = 1})",
            "md5(\"x\")",
            "timestamp()",
            "basename(\"/a/b.tf\")",
            "tonumber(\"3\")",
            "ceil(1.5)",
            "cidrsubnet(\"10.0.0.0/16\", 8, 1)",
            "setunion([1], [2])",
            "yamldecode(\"a: 1\")",
            "sha1(\"x\")",
            "pow(2, 3)",
            "strrev(\"ab\")",
        ];
        for call in calls {
            assert!(eval_str(call).is_ok(), "{call} should evaluate");
        }
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert!(eval_str("nosuchfunc(1)").is_err());
    }

    #[test]
    fn number_keeps_integers_integral() {
        assert_eq!(number(3.0), Value::from(3));
        assert_eq!(number(2.5).as_f64(), Some(2.5));
    }
}
