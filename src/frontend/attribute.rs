use hcl::eval::Evaluate;
use hcl::expr::{Expression, TraversalOperator};
use hcl::template::{Directive, Element, Template};
use std::collections::HashSet;

use super::builtins::filesystem::calls_file_functions;
use super::value::Resolved;
use crate::context::Context;

/// One `name = expression` pair bound to the scope it evaluates in.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
    expr: Expression,
    ctx: Context,
}

impl Attribute {
    pub fn new(name: impl Into<String>, expr: Expression, ctx: Context) -> Self {
        Self {
            name: name.into(),
            expr,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expr(&self) -> &Expression {
        &self.expr
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn rebind(&mut self, ctx: Context) {
        self.ctx = ctx;
    }

    /// Evaluate against the bound scope.
    pub fn value(&self) -> Resolved {
        self.value_in(&self.ctx.eval_context())
    }

    /// Evaluate against an already-built evaluation context, so callers
    /// resolving many attributes of one block build it once.
    pub fn value_in(&self, ctx: &hcl::eval::Context<'_>) -> Resolved {
        let inlined;
        let expr = match self.ctx.files() {
            Some(files) if calls_file_functions(&self.expr) => {
                inlined = files.inline(&self.expr, ctx);
                &inlined
            }
            _ => &self.expr,
        };
        match expr.evaluate(ctx) {
            Ok(v) => Resolved::Known(v),
            Err(err) => {
                log::debug!("attribute {} is unknown: {}", self.name, err);
                Resolved::Unknown
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        self.value().as_str().map(str::to_string)
    }

    /// A literal carries no references and needs no context.
    pub fn is_literal(&self) -> bool {
        matches!(
            self.expr,
            Expression::Null | Expression::Bool(_) | Expression::Number(_) | Expression::String(_)
        )
    }

    /// Root name of a bare traversal such as `iterator = rule`.
    pub fn root_name(&self) -> Option<String> {
        match &self.expr {
            Expression::Variable(v) => Some(v.to_string()),
            Expression::Traversal(t) if t.operators.is_empty() => match &t.expr {
                Expression::Variable(v) => Some(v.to_string()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Every symbolic reference in the expression, as dotted traversals
    /// like `aws_instance.web[0].id`. For-expression bindings are excluded.
    pub fn references(&self) -> Vec<String> {
        let mut refs = Vec::new();
        collect_refs(&self.expr, &HashSet::new(), &mut refs);
        refs.dedup();
        refs
    }
}

fn collect_refs(expr: &Expression, bound: &HashSet<String>, out: &mut Vec<String>) {
    match expr {
        Expression::Variable(v) => {
            let name = v.to_string();
            if !bound.contains(&name) {
                out.push(name);
            }
        }
        Expression::Traversal(t) => {
            match &t.expr {
                Expression::Variable(v) => {
                    let root = v.to_string();
                    if !bound.contains(&root) {
                        out.push(traversal_path(root, &t.operators));
                    }
                }
                other => collect_refs(other, bound, out),
            }
            for op in &t.operators {
                if let TraversalOperator::Index(index) = op {
                    collect_refs(index, bound, out);
                }
            }
        }
        Expression::Array(items) => {
            for item in items {
                collect_refs(item, bound, out);
            }
        }
        Expression::Object(object) => {
            for (key, value) in object.iter() {
                if let hcl::expr::ObjectKey::Expression(k) = key {
                    collect_refs(k, bound, out);
                }
                collect_refs(value, bound, out);
            }
        }
        Expression::FuncCall(call) => {
            for arg in &call.args {
                collect_refs(arg, bound, out);
            }
        }
        Expression::Parenthesis(inner) => collect_refs(inner, bound, out),
        Expression::Conditional(cond) => {
            collect_refs(&cond.cond_expr, bound, out);
            collect_refs(&cond.true_expr, bound, out);
            collect_refs(&cond.false_expr, bound, out);
        }
        Expression::Operation(op) => match op.as_ref() {
            hcl::expr::Operation::Unary(unary) => collect_refs(&unary.expr, bound, out),
            hcl::expr::Operation::Binary(binary) => {
                collect_refs(&binary.lhs_expr, bound, out);
                collect_refs(&binary.rhs_expr, bound, out);
            }
            #[allow(unreachable_patterns)]
            _ => {}
        },
        Expression::ForExpr(for_expr) => {
            collect_refs(&for_expr.collection_expr, bound, out);
            let mut inner = bound.clone();
            inner.insert(for_expr.value_var.to_string());
            if let Some(key_var) = &for_expr.key_var {
                inner.insert(key_var.to_string());
            }
            if let Some(key_expr) = &for_expr.key_expr {
                collect_refs(key_expr, &inner, out);
            }
            collect_refs(&for_expr.value_expr, &inner, out);
            if let Some(cond) = &for_expr.cond_expr {
                collect_refs(cond, &inner, out);
            }
        }
        Expression::TemplateExpr(template_expr) => {
            if let Ok(template) = Template::from_expr(template_expr) {
                collect_template_refs(&template, bound, out);
            }
        }
        _ => {}
    }
}

fn collect_template_refs(template: &Template, bound: &HashSet<String>, out: &mut Vec<String>) {
    for element in template.elements() {
        match element {
            Element::Literal(_) => {}
            Element::Interpolation(interp) => collect_refs(&interp.expr, bound, out),
            Element::Directive(directive) => {
                let directive: &Directive = directive;
                match directive {
                    Directive::If(if_dir) => {
                        collect_refs(&if_dir.cond_expr, bound, out);
                        collect_template_refs(&if_dir.true_template, bound, out);
                        if let Some(false_template) = &if_dir.false_template {
                            collect_template_refs(false_template, bound, out);
                        }
                    }
                    Directive::For(for_dir) => {
                        collect_refs(&for_dir.collection_expr, bound, out);
                        let mut inner = bound.clone();
                        inner.insert(for_dir.value_var.to_string());
                        if let Some(key_var) = &for_dir.key_var {
                            inner.insert(key_var.to_string());
                        }
                        collect_template_refs(&for_dir.template, &inner, out);
                    }
                }
            }
        }
    }
}

/// Render the statically known prefix of a traversal. Splats and computed
/// indexes end the path.
fn traversal_path(root: String, operators: &[TraversalOperator]) -> String {
    let mut path = root;
    for op in operators {
        match op {
            TraversalOperator::GetAttr(ident) => {
                path.push('.');
                path.push_str(ident.as_str());
            }
            TraversalOperator::LegacyIndex(i) => path.push_str(&format!("[{i}]")),
            TraversalOperator::Index(Expression::Number(n)) => match n.as_u64() {
                Some(i) => path.push_str(&format!("[{i}]")),
                None => break,
            },
            TraversalOperator::Index(Expression::String(s)) => {
                path.push_str(&format!("[{s:?}]"));
            }
            _ => break,
        }
    }
    path
}
