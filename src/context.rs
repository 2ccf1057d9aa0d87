//! Hierarchical variable scopes used during evaluation.
//!
//! A [`Context`] is a cheap handle: cloning it shares the same scope, so a
//! module, its blocks and their attributes can all observe values written
//! by the evaluator between passes.

use hcl::value::Map;
use hcl::Value;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::frontend::builtins;
use crate::frontend::builtins::filesystem::FileScope;

#[derive(Default)]
struct Scope {
    parent: Option<Context>,
    values: Map<String, Value>,
    files: Option<FileScope>,
}

#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<RwLock<Scope>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.read();
        f.debug_struct("Context")
            .field("values", &scope.values)
            .field("has_parent", &scope.parent.is_some())
            .finish()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Scope> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Scope> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Derive an isolated scope whose lookups fall back to `self`.
    pub fn new_child(&self) -> Context {
        Context {
            inner: Arc::new(RwLock::new(Scope {
                parent: Some(self.clone()),
                values: Map::new(),
                files: None,
            })),
        }
    }

    pub fn parent(&self) -> Option<Context> {
        self.read().parent.clone()
    }

    /// Walk up to the top-most ancestor.
    pub fn root(&self) -> Context {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Let file functions evaluated in this scope and its children read
    /// through `files`.
    pub fn set_files(&self, files: FileScope) {
        self.write().files = Some(files);
    }

    /// The nearest file scope, if any ancestor set one.
    pub fn files(&self) -> Option<FileScope> {
        let scope = self.read();
        match &scope.files {
            Some(files) => Some(files.clone()),
            None => scope.parent.as_ref().and_then(Context::files),
        }
    }

    pub fn same_scope(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Look up a nested value as seen through the merged view of every
    /// ancestor, the same view [`Context::variables`] builds.
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let scope = self.read();
        let inherited = || scope.parent.as_ref().and_then(|p| p.get(path));
        let Some(value) = scope.values.get(*first) else {
            return inherited();
        };
        match lookup_local(value, rest) {
            Lookup::Found(Value::Object(local)) => match inherited() {
                Some(parent @ Value::Object(_)) => Some(merge_values(parent, Value::Object(local))),
                _ => Some(Value::Object(local)),
            },
            Lookup::Found(value) => Some(value),
            Lookup::MissingKey => inherited(),
            Lookup::Shadowed => None,
        }
    }

    pub fn get_by_dot(&self, dotted: &str) -> Option<Value> {
        let parts: Vec<&str> = dotted.split('.').collect();
        self.get(&parts)
    }

    /// Write `value` at `path`, merging objects with whatever already lives
    /// there instead of replacing them.
    pub fn set(&self, path: &[&str], value: Value) {
        let mut scope = self.write();
        set_in(&mut scope.values, path, value, true);
    }

    pub fn set_by_dot(&self, dotted: &str, value: Value) {
        let parts: Vec<&str> = dotted.split('.').collect();
        self.set(&parts, value);
    }

    /// Overwrite the value at `path` without merging.
    pub fn replace(&self, path: &[&str], value: Value) {
        let mut scope = self.write();
        set_in(&mut scope.values, path, value, false);
    }

    /// Values defined directly on this scope.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.read().values.clone()
    }

    /// Every visible variable, ancestors first with nearer scopes merged on top.
    pub fn variables(&self) -> Map<String, Value> {
        let scope = self.read();
        let mut vars = match &scope.parent {
            Some(parent) => parent.variables(),
            None => Map::new(),
        };
        for (key, value) in scope.values.iter() {
            put(&mut vars, key, value.clone(), true);
        }
        vars
    }

    /// Build an `hcl` evaluation context carrying every visible variable and
    /// the builtin function table.
    pub fn eval_context(&self) -> hcl::eval::Context<'static> {
        let mut ctx = builtins::create_context();
        for (key, value) in self.variables() {
            ctx.declare_var(key, value);
        }
        ctx
    }
}

enum Lookup {
    Found(Value),
    /// An object on the path lacks the key, so an ancestor may still supply it.
    MissingKey,
    /// A non-object value on this scope hides whatever ancestors hold.
    Shadowed,
}

fn lookup_local(value: &Value, rest: &[&str]) -> Lookup {
    let mut current = value;
    for part in rest {
        current = match current {
            Value::Object(map) => match map.get(*part) {
                Some(next) => next,
                None => return Lookup::MissingKey,
            },
            Value::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => next,
                None => return Lookup::Shadowed,
            },
            _ => return Lookup::Shadowed,
        };
    }
    Lookup::Found(current.clone())
}

fn set_in(values: &mut Map<String, Value>, path: &[&str], value: Value, merge: bool) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        put(values, first, value, merge);
        return;
    }
    let entry = values
        .entry(first.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !matches!(entry, Value::Object(_)) {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(map) = entry {
        set_in(map, rest, value, merge);
    }
}

fn put(values: &mut Map<String, Value>, key: &str, value: Value, merge: bool) {
    match values.get_mut(key) {
        Some(existing) if merge => {
            let old = std::mem::replace(existing, Value::Null);
            *existing = merge_values(old, value);
        }
        Some(existing) => *existing = value,
        None => {
            values.insert(key.to_string(), value);
        }
    }
}

/// Union two objects recursively; `incoming` wins on conflicts and any
/// non-object pair is replaced outright.
pub fn merge_values(existing: Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (key, value) in over {
                put(&mut base, &key, value, true);
            }
            Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        Value::Object(map)
    }

    #[test]
    fn sibling_paths_do_not_clobber_each_other() {
        let ctx = Context::new();
        ctx.set(&["var", "a"], Value::from("one"));
        ctx.set(&["var", "b"], Value::from("two"));
        ctx.set(&["var", "nested", "x"], Value::from(1));
        ctx.set(&["var", "nested", "y"], Value::from(2));

        assert_eq!(ctx.get(&["var", "a"]), Some(Value::from("one")));
        assert_eq!(ctx.get(&["var", "b"]), Some(Value::from("two")));
        assert_eq!(ctx.get(&["var", "nested", "x"]), Some(Value::from(1)));
        assert_eq!(ctx.get(&["var", "nested", "y"]), Some(Value::from(2)));
    }

    #[test]
    fn setting_same_value_twice_is_idempotent() {
        let ctx = Context::new();
        ctx.set(&["local", "name"], Value::from("x"));
        let before = ctx.snapshot();
        ctx.set(&["local", "name"], Value::from("x"));
        assert_eq!(before, ctx.snapshot());
    }

    #[test]
    fn object_values_merge_and_new_keys_win() {
        let ctx = Context::new();
        ctx.set(&["module", "a"], obj(&[("x", Value::from(1)), ("y", Value::from(1))]));
        ctx.set(&["module", "a"], obj(&[("y", Value::from(2)), ("z", Value::from(3))]));
        assert_eq!(ctx.get(&["module", "a", "x"]), Some(Value::from(1)));
        assert_eq!(ctx.get(&["module", "a", "y"]), Some(Value::from(2)));
        assert_eq!(ctx.get(&["module", "a", "z"]), Some(Value::from(3)));
    }

    #[test]
    fn non_object_values_are_replaced() {
        let ctx = Context::new();
        ctx.set(&["var", "list"], Value::from(vec![Value::from(1)]));
        ctx.set(&["var", "list"], Value::from("flat"));
        assert_eq!(ctx.get(&["var", "list"]), Some(Value::from("flat")));
    }

    #[test]
    fn replace_drops_previous_keys() {
        let ctx = Context::new();
        ctx.set(&["res", "web"], obj(&[("id", Value::from("x"))]));
        ctx.replace(&["res", "web"], Value::Object(Map::new()));
        assert_eq!(ctx.get(&["res", "web", "id"]), None);
    }

    #[test]
    fn child_scope_falls_back_to_parent_and_stays_isolated() {
        let parent = Context::new();
        parent.set(&["var", "region"], Value::from("eu"));
        let child = parent.new_child();
        child.set(&["count", "index"], Value::from(0));

        assert_eq!(child.get(&["var", "region"]), Some(Value::from("eu")));
        assert_eq!(child.get(&["count", "index"]), Some(Value::from(0)));
        assert_eq!(parent.get(&["count", "index"]), None);
        assert!(child.root().same_scope(&parent));
    }

    #[test]
    fn child_writes_do_not_hide_parent_siblings() {
        let parent = Context::new();
        parent.set(&["var", "region"], Value::from("eu"));
        parent.set(&["var", "tags"], obj(&[("team", Value::from("core"))]));
        let child = parent.new_child();
        child.set(&["var", "size"], Value::from(1));
        child.set(&["var", "tags"], obj(&[("env", Value::from("dev"))]));

        assert_eq!(child.get(&["var", "region"]), Some(Value::from("eu")));
        assert_eq!(child.get(&["var", "size"]), Some(Value::from(1)));
        assert_eq!(child.get(&["var", "tags", "team"]), Some(Value::from("core")));
        assert_eq!(
            child.get(&["var", "tags"]),
            Some(obj(&[("team", Value::from("core")), ("env", Value::from("dev"))]))
        );
        let merged = child.variables();
        assert_eq!(child.get(&["var"]).as_ref(), merged.get("var"));
        assert_eq!(parent.get(&["var", "size"]), None);
    }

    #[test]
    fn child_scalars_shadow_parent_objects() {
        let parent = Context::new();
        parent.set(&["var", "list"], obj(&[("a", Value::from(1))]));
        let child = parent.new_child();
        child.set(&["var", "list"], Value::from("flat"));
        assert_eq!(child.get(&["var", "list", "a"]), None);
        assert_eq!(child.get(&["var", "list"]), Some(Value::from("flat")));
    }

    #[test]
    fn variables_merge_child_over_parent() {
        let parent = Context::new();
        parent.set(&["each", "key"], Value::from("outer"));
        parent.set(&["each", "value"], Value::from(1));
        let child = parent.new_child();
        child.set(&["each", "key"], Value::from("inner"));

        let vars = child.variables();
        let each = vars.get("each").and_then(|v| v.as_object()).unwrap();
        assert_eq!(each.get("key"), Some(&Value::from("inner")));
        assert_eq!(each.get("value"), Some(&Value::from(1)));
    }

    #[test]
    fn array_segments_index_into_lists() {
        let ctx = Context::new();
        ctx.set(
            &["widget", "web"],
            Value::from(vec![obj(&[("id", Value::from("a"))]), obj(&[("id", Value::from("b"))])]),
        );
        assert_eq!(ctx.get_by_dot("widget.web.1.id"), Some(Value::from("b")));
    }
}
