//! Symbolic block addresses such as `module.vpc.aws_subnet.private["a"]`.

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefKind {
    Resource { type_: String, name: String },
    Data { type_: String, name: String },
    Module { name: String },
    Output { name: String },
    Provider { name: String, alias: Option<String> },
    Variable { name: String },
    Local { name: String },
}

/// Instance selector appended to an expanded block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefKey {
    Index(usize),
    Key(String),
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKey::Index(i) => write!(f, "[{}]", i),
            RefKey::Key(k) => write!(f, "[{:?}]", k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Enclosing module call names, outermost first. Instance suffixes stay
    /// on the name (`a[0]`).
    pub modules: Vec<String>,
    pub kind: RefKind,
    pub key: Option<RefKey>,
}

impl Reference {
    pub fn new(kind: RefKind) -> Self {
        Self {
            modules: Vec::new(),
            kind,
            key: None,
        }
    }

    pub fn in_module(mut self, address: Option<&str>) -> Self {
        if let Some(address) = address {
            if let Ok(parent) = address.parse::<Reference>() {
                if let RefKind::Module { name } = parent.kind {
                    let mut modules = parent.modules;
                    let name = match parent.key {
                        Some(key) => format!("{name}{key}"),
                        None => name,
                    };
                    modules.push(name);
                    modules.extend(self.modules);
                    self.modules = modules;
                }
            }
        }
        self
    }

    pub fn with_key(mut self, key: Option<RefKey>) -> Self {
        self.key = key;
        self
    }

    /// Address of the enclosing module, e.g. `module.a.module.b`.
    pub fn module_address(&self) -> Option<String> {
        if self.modules.is_empty() {
            return None;
        }
        Some(
            self.modules
                .iter()
                .map(|m| format!("module.{m}"))
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    /// The address without the module prefix.
    pub fn local(&self) -> String {
        let mut s = match &self.kind {
            RefKind::Resource { type_, name } => format!("{type_}.{name}"),
            RefKind::Data { type_, name } => format!("data.{type_}.{name}"),
            RefKind::Module { name } => format!("module.{name}"),
            RefKind::Output { name } => format!("output.{name}"),
            RefKind::Provider { name, alias } => match alias {
                Some(alias) => format!("provider.{name}.{alias}"),
                None => format!("provider.{name}"),
            },
            RefKind::Variable { name } => format!("var.{name}"),
            RefKind::Local { name } => format!("local.{name}"),
        };
        if let Some(key) = &self.key {
            s.push_str(&key.to_string());
        }
        s
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.modules {
            write!(f, "module.{}.", m)?;
        }
        write!(f, "{}", self.local())
    }
}

impl FromStr for Reference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (body, key) = split_key(s)?;
        let parts = split_parts(body);
        if parts.iter().any(|p| p.is_empty()) {
            bail!("invalid reference {s:?}");
        }

        let mut rest: &[String] = &parts;
        let mut modules = Vec::new();
        while rest.len() > 2 && rest[0] == "module" {
            modules.push(rest[1].clone());
            rest = &rest[2..];
        }

        let kind = match rest {
            [d, t, n] if d == "data" => RefKind::Data {
                type_: t.clone(),
                name: n.clone(),
            },
            [p, n] if p == "provider" => RefKind::Provider {
                name: n.clone(),
                alias: None,
            },
            [p, n, a] if p == "provider" => RefKind::Provider {
                name: n.clone(),
                alias: Some(a.clone()),
            },
            [m, n] if m == "module" => RefKind::Module { name: n.clone() },
            [o, n] if o == "output" => RefKind::Output { name: n.clone() },
            [v, n] if v == "var" => RefKind::Variable { name: n.clone() },
            [l, n] if l == "local" => RefKind::Local { name: n.clone() },
            [t, n] => RefKind::Resource {
                type_: t.clone(),
                name: n.clone(),
            },
            _ => bail!("invalid reference {s:?}"),
        };

        Ok(Reference { modules, kind, key })
    }
}

/// Peel a trailing `[N]` or `["key"]` off an address.
pub(crate) fn split_key(s: &str) -> Result<(&str, Option<RefKey>)> {
    if !s.ends_with(']') {
        return Ok((s, None));
    }
    let open = match find_key_open(s) {
        Some(open) => open,
        None => bail!("unbalanced index in reference {s:?}"),
    };
    let inner = &s[open + 1..s.len() - 1];
    let key = if let Some(quoted) = inner.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        RefKey::Key(quoted.replace("\\\"", "\"").replace("\\\\", "\\"))
    } else {
        match inner.parse::<usize>() {
            Ok(i) => RefKey::Index(i),
            Err(_) => bail!("invalid index {inner:?} in reference {s:?}"),
        }
    };
    Ok((&s[..open], Some(key)))
}

/// Drop a trailing instance selector, leaving anything malformed untouched.
pub fn strip_instance(s: &str) -> &str {
    match split_key(s) {
        Ok((body, Some(_))) => body,
        _ => s,
    }
}

/// Remove every `[...]` selector from a dotted address, so
/// `a[0].b["x.y"].c` becomes `a.b.c`.
pub fn strip_selectors(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if depth > 0 {
            match c {
                '\\' if in_quotes => {
                    chars.next();
                }
                '"' => in_quotes = !in_quotes,
                '[' if !in_quotes => depth += 1,
                ']' if !in_quotes => depth -= 1,
                _ => {}
            }
            continue;
        }
        if c == '[' {
            depth = 1;
            continue;
        }
        out.push(c);
    }
    out
}

fn find_key_open(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_quotes = false;
    let mut open = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_quotes => i += 1,
            b'"' => in_quotes = !in_quotes,
            b'[' if !in_quotes => open = Some(i),
            _ => {}
        }
        i += 1;
    }
    open
}

/// Split on dots that are not inside an index selector.
fn split_parts(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                continue;
            }
            '"' if depth > 0 => in_quotes = !in_quotes,
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}
