//! Reading `*.tf.json` files into the same [`hcl::Body`] the native syntax
//! produces.
//!
//! Top-level keys name block types and nest one object per label. Inside a
//! block body every key is an attribute, except the few nested block types
//! listed in [`NESTED_BLOCKS`]. Strings holding `${...}` become template
//! expressions; a string that is a single interpolation becomes the inner
//! expression so that it keeps its type.

use anyhow::{bail, Context as _, Result};
use hcl::expr::{Expression, Object, ObjectKey, TemplateExpr};
use hcl::{Attribute, Block, Body};
use serde_json::{Map, Value};

use super::parse_expression;

/// Number of labels each top-level block type carries.
const TOP_LEVEL_LABELS: [(&str, usize); 11] = [
    ("resource", 2),
    ("data", 2),
    ("module", 1),
    ("variable", 1),
    ("output", 1),
    ("provider", 1),
    ("check", 1),
    ("locals", 0),
    ("terraform", 0),
    ("moved", 0),
    ("import", 0),
];

/// Block types that may appear inside a block body, with their label count.
const NESTED_BLOCKS: [(&str, usize); 8] = [
    ("dynamic", 1),
    ("content", 0),
    ("lifecycle", 0),
    ("connection", 0),
    ("provisioner", 1),
    ("backend", 1),
    ("cloud", 0),
    ("required_providers", 0),
];

const COMMENT_KEY: &str = "//";

pub fn is_json_config(name: &str) -> bool {
    name.ends_with(".tf.json")
}

/// Parse the text of a `.tf.json` file.
pub fn body_from_json(src: &str) -> Result<Body> {
    let root: Value = serde_json::from_str(src).context("invalid JSON configuration")?;
    let Value::Object(root) = root else {
        bail!("JSON configuration must be an object");
    };

    let mut blocks = Vec::new();
    for (block_type, value) in &root {
        if block_type == COMMENT_KEY {
            continue;
        }
        let Some(labels) = label_count(&TOP_LEVEL_LABELS, block_type) else {
            log::debug!("ignoring unknown top-level key {block_type:?}");
            continue;
        };
        collect_blocks(block_type, labels, value, &mut Vec::new(), &mut blocks)
            .with_context(|| format!("in {block_type} block"))?;
    }
    Ok(Body::from(blocks))
}

fn label_count(table: &[(&str, usize)], name: &str) -> Option<usize> {
    table.iter().find(|(n, _)| *n == name).map(|(_, count)| *count)
}

/// Walk `remaining` levels of label objects and emit one block per body
/// found at the bottom. A body given as an array yields one block per item.
fn collect_blocks(
    block_type: &str,
    remaining: usize,
    value: &Value,
    labels: &mut Vec<String>,
    out: &mut Vec<Block>,
) -> Result<()> {
    if remaining == 0 {
        match value {
            Value::Array(items) => {
                for item in items {
                    out.push(build_block(block_type, labels, item)?);
                }
            }
            other => out.push(build_block(block_type, labels, other)?),
        }
        return Ok(());
    }
    let Value::Object(map) = value else {
        bail!("expected an object keyed by {block_type} label");
    };
    for (label, inner) in map {
        if label == COMMENT_KEY {
            continue;
        }
        labels.push(label.clone());
        collect_blocks(block_type, remaining - 1, inner, labels, out)?;
        labels.pop();
    }
    Ok(())
}

fn build_block(block_type: &str, labels: &[String], value: &Value) -> Result<Block> {
    let Value::Object(map) = value else {
        bail!("{block_type} body must be an object");
    };
    let (attributes, blocks) = body_parts(map)?;
    Ok(Block::builder(block_type)
        .add_labels(labels.iter().cloned())
        .add_attributes(attributes)
        .add_blocks(blocks)
        .build())
}

fn body_parts(map: &Map<String, Value>) -> Result<(Vec<Attribute>, Vec<Block>)> {
    let mut attributes = Vec::new();
    let mut blocks = Vec::new();
    for (key, value) in map {
        if key == COMMENT_KEY {
            continue;
        }
        match label_count(&NESTED_BLOCKS, key) {
            Some(labels) if value.is_object() || value.is_array() => {
                collect_blocks(key, labels, value, &mut Vec::new(), &mut blocks)
                    .with_context(|| format!("in nested {key} block"))?;
            }
            _ => attributes.push(Attribute::new(key.as_str(), expression(value))),
        }
    }
    Ok((attributes, blocks))
}

/// Convert a JSON value into an expression, reading templates out of
/// strings.
pub fn expression(value: &Value) -> Expression {
    match value {
        Value::Null => Expression::Null,
        Value::Bool(b) => Expression::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Expression::from(i)
            } else if let Some(u) = n.as_u64() {
                Expression::from(u)
            } else {
                Expression::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => string_expression(s),
        Value::Array(items) => Expression::Array(items.iter().map(expression).collect()),
        Value::Object(map) => {
            let mut object = Object::new();
            for (key, value) in map {
                if key != COMMENT_KEY {
                    object.insert(ObjectKey::from(key.as_str()), expression(value));
                }
            }
            Expression::Object(object)
        }
    }
}

fn string_expression(s: &str) -> Expression {
    if !s.contains("${") && !s.contains("%{") {
        return Expression::String(s.to_string());
    }
    if let Some(inner) = single_interpolation(s) {
        if let Ok(expr) = parse_expression(inner) {
            return expr;
        }
    }
    Expression::TemplateExpr(Box::new(TemplateExpr::QuotedString(s.to_string())))
}

/// The expression inside `"${ ... }"` when the whole string is one
/// interpolation.
fn single_interpolation(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") || inner.contains("%{") {
        return None;
    }
    Some(inner.trim().trim_start_matches('~').trim_end_matches('~').trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl::eval::Evaluate;

    fn eval(expr: &Expression) -> hcl::Value {
        let mut ctx = crate::frontend::create_context();
        ctx.declare_var(
            "var",
            hcl::Value::Object(
                [("n".to_string(), hcl::Value::from(2))].into_iter().collect(),
            ),
        );
        expr.evaluate(&ctx).unwrap()
    }

    #[test]
    fn labels_nest_per_block_type() {
        let body = body_from_json(
            r#"{
              "//": "generated",
              "variable": { "region": { "default": "eu-west-1" } },
              "resource": {
                "aws_instance": {
                  "web": { "instance_type": "t3.micro", "lifecycle": { "create_before_destroy": true } },
                  "db": { "count": 2 }
                }
              },
              "provider": { "aws": [ { "region": "eu-west-1" }, { "alias": "us", "region": "us-east-1" } ] },
              "locals": { "name": "x" }
            }"#,
        )
        .unwrap();
        let blocks: Vec<_> = body.blocks().collect();
        let summary: Vec<(String, Vec<String>)> = blocks
            .iter()
            .map(|b| {
                (
                    b.identifier().to_string(),
                    b.labels().iter().map(|l| l.as_str().to_string()).collect(),
                )
            })
            .collect();
        assert!(summary.contains(&("variable".into(), vec!["region".into()])));
        assert!(summary.contains(&("resource".into(), vec!["aws_instance".into(), "web".into()])));
        assert!(summary.contains(&("resource".into(), vec!["aws_instance".into(), "db".into()])));
        assert_eq!(summary.iter().filter(|(t, _)| t == "provider").count(), 2);
        assert!(summary.contains(&("locals".into(), vec![])));

        let web = blocks
            .iter()
            .find(|b| b.labels().get(1).is_some_and(|l| l.as_str() == "web"))
            .unwrap();
        assert_eq!(web.body().blocks().next().unwrap().identifier(), "lifecycle");
        assert_eq!(web.body().attributes().count(), 1);
    }

    #[test]
    fn interpolations_become_expressions() {
        let whole = expression(&serde_json::json!("${var.n * 2}"));
        assert_eq!(eval(&whole), hcl::Value::from(4));

        let template = expression(&serde_json::json!("web-${var.n}"));
        assert!(matches!(template, Expression::TemplateExpr(_)));
        assert_eq!(eval(&template), hcl::Value::from("web-2"));

        assert_eq!(
            expression(&serde_json::json!("plain")),
            Expression::String("plain".into())
        );
    }

    #[test]
    fn dynamic_blocks_keep_their_content() {
        let body = body_from_json(
            r#"{ "resource": { "sg": { "fw": {
                "dynamic": { "ingress": { "for_each": "${var.ports}", "content": { "port": "${ingress.value}" } } }
            } } } }"#,
        )
        .unwrap();
        let fw = body.blocks().next().unwrap();
        let dynamic = fw.body().blocks().next().unwrap();
        assert_eq!(dynamic.identifier(), "dynamic");
        assert_eq!(dynamic.labels()[0].as_str(), "ingress");
        assert_eq!(dynamic.body().blocks().next().unwrap().identifier(), "content");
        assert!(matches!(
            dynamic.body().attributes().next().unwrap().expr(),
            Expression::Traversal(_)
        ));
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(body_from_json("[1, 2]").is_err());
        assert!(body_from_json("{ \"resource\": 3 }").is_err());
        assert!(body_from_json("not json").is_err());
    }
}
