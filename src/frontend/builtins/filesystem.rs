//! Functions that read files relative to the module directory.
//!
//! `hcl` functions are plain function pointers and cannot reach a loader, so
//! these calls are inlined into the expression before it is evaluated: the
//! arguments are evaluated first, the file is read through the module's
//! [`Loader`], and the call is replaced by its result.

use base64::{engine::general_purpose, Engine as _};
use globset::GlobBuilder;
use hcl::eval::{Context, Evaluate};
use hcl::expr::{Expression, FuncCall, Operation, TraversalOperator};
use hcl::template::Template;
use hcl::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::{create_context, str_arg};
use crate::loader::Loader;
use crate::modules::source::normalize_path;

pub const FILE_FUNCTIONS: [&str; 11] = [
    "file",
    "fileexists",
    "fileset",
    "filebase64",
    "filemd5",
    "filesha1",
    "filesha256",
    "filesha512",
    "filebase64sha256",
    "filebase64sha512",
    "templatefile",
];

/// Where relative paths in file functions are resolved, and how files are
/// read.
#[derive(Clone)]
pub struct FileScope {
    loader: Arc<dyn Loader + Send + Sync>,
    base: PathBuf,
}

impl fmt::Debug for FileScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileScope").field("base", &self.base).finish()
    }
}

impl FileScope {
    pub fn new(loader: Arc<dyn Loader + Send + Sync>, base: impl Into<PathBuf>) -> Self {
        Self {
            loader,
            base: base.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.base.join(path))
        }
    }

    fn read(&self, path: &str) -> Result<String, String> {
        self.loader
            .load(&self.resolve(path))
            .map_err(|e| format!("{e:#}"))
    }

    /// Run one file function on already evaluated arguments.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        let path = str_arg(args, 0)?;
        match name {
            "file" => self.read(path).map(Value::from),
            "fileexists" => Ok(Value::Bool(self.loader.is_file(&self.resolve(path)))),
            "fileset" => self.fileset(path, str_arg(args, 1)?),
            "filebase64" => {
                let contents = self.read(path)?;
                Ok(Value::from(general_purpose::STANDARD.encode(contents.as_bytes())))
            }
            "filemd5" => Ok(Value::from(format!("{:x}", md5::compute(self.read(path)?)))),
            "filesha1" => Ok(Value::from(format!("{:x}", Sha1::digest(self.read(path)?)))),
            "filesha256" => Ok(Value::from(format!("{:x}", Sha256::digest(self.read(path)?)))),
            "filesha512" => Ok(Value::from(format!("{:x}", Sha512::digest(self.read(path)?)))),
            "filebase64sha256" => Ok(Value::from(
                general_purpose::STANDARD.encode(Sha256::digest(self.read(path)?)),
            )),
            "filebase64sha512" => Ok(Value::from(
                general_purpose::STANDARD.encode(Sha512::digest(self.read(path)?)),
            )),
            "templatefile" => self.templatefile(path, args.get(1)),
            other => Err(format!("unknown file function {other}")),
        }
    }

    /// Files under `dir` matching `pattern`, as sorted paths relative to `dir`.
    fn fileset(&self, dir: &str, pattern: &str) -> Result<Value, String> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| e.to_string())?
            .compile_matcher();
        let root = self.resolve(dir);
        let mut found = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(current) = pending.pop() {
            let Ok(entries) = self.loader.read_dir(&current) else {
                continue;
            };
            for entry in entries {
                if self.loader.is_dir(&entry) {
                    pending.push(entry);
                } else if let Ok(rel) = entry.strip_prefix(&root) {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    if matcher.is_match(&rel) {
                        found.push(rel);
                    }
                }
            }
        }
        found.sort();
        Ok(Value::Array(found.into_iter().map(Value::from).collect()))
    }

    fn templatefile(&self, path: &str, vars: Option<&Value>) -> Result<Value, String> {
        let src = self.read(path)?;
        let template = Template::from_str(&src).map_err(|e| e.to_string())?;
        let mut ctx = create_context();
        match vars {
            Some(Value::Object(vars)) => {
                for (key, value) in vars {
                    ctx.declare_var(key.as_str(), value.clone());
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => return Err("templatefile variables must be an object".to_string()),
        }
        template
            .evaluate(&ctx)
            .map(Value::from)
            .map_err(|e| e.to_string())
    }

    /// Replace every file function call in `expr` whose arguments are known
    /// with the value it produces. Calls that fail are left in place and
    /// make the expression unknown.
    pub fn inline(&self, expr: &Expression, ctx: &Context<'_>) -> Expression {
        match expr {
            Expression::FuncCall(call) => {
                let args: Vec<Expression> = call.args.iter().map(|a| self.inline(a, ctx)).collect();
                let name = call.name.name.as_str();
                if call.name.namespace.is_empty() && FILE_FUNCTIONS.contains(&name) {
                    let values: Result<Vec<Value>, String> = args
                        .iter()
                        .map(|a| a.evaluate(ctx).map_err(|e| e.to_string()))
                        .collect();
                    match values.and_then(|values| self.call(name, &values)) {
                        Ok(value) => return Expression::from(value),
                        Err(err) => log::debug!("{name}() failed: {err}"),
                    }
                }
                Expression::FuncCall(Box::new(FuncCall {
                    name: call.name.clone(),
                    args,
                    expand_final: call.expand_final,
                }))
            }
            Expression::Array(items) => {
                Expression::Array(items.iter().map(|e| self.inline(e, ctx)).collect())
            }
            Expression::Object(object) => Expression::Object(
                object
                    .iter()
                    .map(|(k, v)| (k.clone(), self.inline(v, ctx)))
                    .collect(),
            ),
            Expression::Parenthesis(inner) => {
                Expression::Parenthesis(Box::new(self.inline(inner, ctx)))
            }
            Expression::Conditional(cond) => {
                let mut cond = cond.clone();
                cond.cond_expr = self.inline(&cond.cond_expr, ctx);
                cond.true_expr = self.inline(&cond.true_expr, ctx);
                cond.false_expr = self.inline(&cond.false_expr, ctx);
                Expression::Conditional(cond)
            }
            Expression::Operation(op) => {
                let mut op = op.clone();
                match op.as_mut() {
                    Operation::Unary(unary) => unary.expr = self.inline(&unary.expr, ctx),
                    Operation::Binary(binary) => {
                        binary.lhs_expr = self.inline(&binary.lhs_expr, ctx);
                        binary.rhs_expr = self.inline(&binary.rhs_expr, ctx);
                    }
                }
                Expression::Operation(op)
            }
            Expression::Traversal(traversal) => {
                let mut traversal = traversal.clone();
                traversal.expr = self.inline(&traversal.expr, ctx);
                for operator in &mut traversal.operators {
                    if let TraversalOperator::Index(index) = operator {
                        *index = self.inline(index, ctx);
                    }
                }
                Expression::Traversal(traversal)
            }
            Expression::ForExpr(for_expr) => {
                let mut for_expr = for_expr.clone();
                for_expr.collection_expr = self.inline(&for_expr.collection_expr, ctx);
                Expression::ForExpr(for_expr)
            }
            other => other.clone(),
        }
    }
}

/// Whether `expr` calls any file function outside of a template.
pub fn calls_file_functions(expr: &Expression) -> bool {
    match expr {
        Expression::FuncCall(call) => {
            FILE_FUNCTIONS.contains(&call.name.name.as_str())
                || call.args.iter().any(calls_file_functions)
        }
        Expression::Array(items) => items.iter().any(calls_file_functions),
        Expression::Object(object) => object.values().any(calls_file_functions),
        Expression::Parenthesis(inner) => calls_file_functions(inner),
        Expression::Conditional(cond) => {
            calls_file_functions(&cond.cond_expr)
                || calls_file_functions(&cond.true_expr)
                || calls_file_functions(&cond.false_expr)
        }
        Expression::Operation(op) => match op.as_ref() {
            Operation::Unary(unary) => calls_file_functions(&unary.expr),
            Operation::Binary(binary) => {
                calls_file_functions(&binary.lhs_expr) || calls_file_functions(&binary.rhs_expr)
            }
        },
        Expression::Traversal(traversal) => {
            calls_file_functions(&traversal.expr)
                || traversal.operators.iter().any(|op| match op {
                    TraversalOperator::Index(index) => calls_file_functions(index),
                    _ => false,
                })
        }
        Expression::ForExpr(for_expr) => calls_file_functions(&for_expr.collection_expr),
        _ => false,
    }
}
