use base64::{engine::general_purpose, Engine as _};
use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::value::Map;
use hcl::Value;

use super::str_arg;

pub fn create_base64encode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(
            general_purpose::STANDARD.encode(str_arg(&args, 0)?.as_bytes()),
        ))
    })
}

pub fn create_base64decode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        let bytes = general_purpose::STANDARD
            .decode(str_arg(&args, 0)?)
            .map_err(|e| e.to_string())?;
        String::from_utf8(bytes)
            .map(Value::from)
            .map_err(|e| e.to_string())
    })
}

/// Serialize any value to a compact JSON string
pub fn create_jsonencode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::Any).build(|args: FuncArgs| {
        let value = args.first().cloned().unwrap_or(Value::Null);
        serde_json::to_string(&value)
            .map(Value::from)
            .map_err(|e| e.to_string())
    })
}

pub fn create_jsondecode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        serde_json::from_str::<Value>(str_arg(&args, 0)?).map_err(|e| e.to_string())
    })
}

pub fn create_yamlencode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::Any).build(|args: FuncArgs| {
        let value = args.first().cloned().unwrap_or(Value::Null);
        serde_yaml::to_string(&value)
            .map(Value::from)
            .map_err(|e| e.to_string())
    })
}

pub fn create_yamldecode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        serde_yaml::from_str::<Value>(str_arg(&args, 0)?).map_err(|e| e.to_string())
    })
}

/// Rows of a CSV document with a header line, as a list of maps with
/// string values.
pub fn create_csvdecode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        let mut reader = csv::Reader::from_reader(str_arg(&args, 0)?.as_bytes());
        let headers = reader.headers().map_err(|e| e.to_string())?.clone();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| e.to_string())?;
            let row: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .collect();
            rows.push(Value::Object(row));
        }
        Ok(Value::from(rows))
    })
}

pub fn create_urlencode_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(
            url::form_urlencoded::byte_serialize(str_arg(&args, 0)?.as_bytes()).collect::<String>(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::super::eval_str;
    use hcl::Value;

    #[test]
    fn test_base64_functions() {
        assert_eq!(eval_str("base64encode(\"hello\")").unwrap(), Value::from("aGVsbG8="));
        assert_eq!(eval_str("base64decode(\"aGVsbG8=\")").unwrap(), Value::from("hello"));
        assert!(eval_str("base64decode(\"@@@\")").is_err());
    }

    #[test]
    fn test_json_functions() {
        assert_eq!(
            eval_str("jsonencode({a = [1, \"x\"]})").unwrap(),
            Value::from("{\"a\":[1,\"x\"]}")
        );
        assert_eq!(
            eval_str("jsondecode(\"{\\\"k\\\": true}\")").unwrap(),
            eval_str("{k = true}").unwrap()
        );
    }

    #[test]
    fn test_yaml_functions() {
        assert_eq!(
            eval_str("yamldecode(\"name: web\\nports:\\n  - 80\\n  - 443\\n\")").unwrap(),
            eval_str("{name = \"web\", ports = [80, 443]}").unwrap()
        );
        assert_eq!(eval_str("yamlencode({a = 1})").unwrap(), Value::from("a: 1\n"));
        assert!(eval_str("yamldecode(\"a: [\")").is_err());
    }

    #[test]
    fn test_csvdecode_rows() {
        assert_eq!(
            eval_str("csvdecode(\"name,size\\nweb,2\\ndb,1\\n\")").unwrap(),
            eval_str("[{name = \"web\", size = \"2\"}, {name = \"db\", size = \"1\"}]").unwrap()
        );
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(eval_str("urlencode(\"a b&c\")").unwrap(), Value::from("a+b%26c"));
    }
}
