use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a reported execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Call,
    Return,
    /// Entry into a natively implemented routine.
    CCall,
    CReturn,
    Line,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Call => "call",
            EventKind::Return => "return",
            EventKind::CCall => "c_call",
            EventKind::CReturn => "c_return",
            EventKind::Line => "line",
        }
    }

    pub fn opens_frame(&self) -> bool {
        matches!(self, EventKind::Call | EventKind::CCall)
    }

    pub fn closes_frame(&self) -> bool {
        matches!(self, EventKind::Return | EventKind::CReturn)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
