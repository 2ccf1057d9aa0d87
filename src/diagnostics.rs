use serde::Serialize;
use std::fmt;

/// Category of a recoverable problem found while loading or evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A module call whose source could not be resolved or parsed.
    ModuleLoad,
    /// Variables with neither a default nor an input value.
    MissingVars,
    /// A file that failed to parse.
    Parse,
    /// A graph vertex that failed to evaluate or expand.
    Vertex,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::ModuleLoad => "module_load",
            DiagnosticKind::MissingVars => "missing_vars",
            DiagnosticKind::Parse => "parse",
            DiagnosticKind::Vertex => "vertex",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Address or path the problem is attached to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn missing_vars(names: &[String]) -> Self {
        Self::new(
            DiagnosticKind::MissingVars,
            format!("missing input values for {}", names.join(", ")),
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "[{}] {}: {}", self.kind, subject, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}
