use std::fmt;

pub type SendableError = Box<dyn std::error::Error + Send + Sync>;

/// Error carrying a dotted context code (`gateway.bind`, `worker.broker.consume`, ...).
#[derive(Debug)]
pub struct RuntimeError {
    code: String,
    message: String,
}

impl RuntimeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Box the error for returning from `main`-level functions.
    pub fn boxed(code: impl Into<String>, message: impl fmt::Display) -> SendableError {
        Box::new(Self::new(code, message.to_string()))
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// A payload field that failed validation at the ingress boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field '{field}': {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
