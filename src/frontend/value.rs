use hcl::Value;

/// Outcome of evaluating an expression. Anything that fails to evaluate,
/// for whatever reason, is `Unknown`; callers never see the error.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Known(Value),
    Unknown,
}

impl Resolved {
    pub fn is_known(&self) -> bool {
        matches!(self, Resolved::Known(_))
    }

    pub fn known(&self) -> Option<&Value> {
        match self {
            Resolved::Known(v) => Some(v),
            Resolved::Unknown => None,
        }
    }

    pub fn into_known(self) -> Option<Value> {
        match self {
            Resolved::Known(v) => Some(v),
            Resolved::Unknown => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.known().and_then(|v| v.as_str())
    }

    /// Count values must be non-negative whole numbers.
    pub fn as_count(&self) -> Option<usize> {
        let n = self.known()?.as_number()?;
        if let Some(u) = n.as_u64() {
            return usize::try_from(u).ok();
        }
        let f = n.as_f64()?;
        (f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
    }
}

impl From<Option<Value>> for Resolved {
    fn from(v: Option<Value>) -> Self {
        match v {
            Some(v) => Resolved::Known(v),
            None => Resolved::Unknown,
        }
    }
}
