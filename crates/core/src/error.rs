//! The error type shared across every crate in the workspace.
//!
//! Syntax errors are returned (never thrown) from compiler entry points.
//! Resolution and runtime errors become a thrown `Value` that unwinds fiber
//! frames to the nearest catch address, or crash the fiber if none exists.
//! Fatal errors crash the fiber outright and are never caught.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RavenError {
    #[error("{path}:{line}:{column}: {message}")]
    Syntax {
        path: String,
        line: usize,
        column: usize,
        message: String,
        excerpt: String,
    },

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("external I/O error: {0}")]
    ExternalIo(String),
}

impl RavenError {
    pub fn runtime(message: impl Into<String>) -> Self {
        RavenError::Runtime(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        RavenError::Fatal(message.into())
    }

    /// Fatal and I/O errors never unwind to a catch block; everything else
    /// can be caught by an in-language `catch` clause.
    pub fn is_catchable(&self) -> bool {
        matches!(self, RavenError::Resolution(_) | RavenError::Runtime(_))
    }
}

impl From<std::io::Error> for RavenError {
    fn from(e: std::io::Error) -> Self {
        RavenError::ExternalIo(e.to_string())
    }
}

pub type RavenResult<T> = Result<T, RavenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_not_catchable() {
        assert!(!RavenError::fatal("stack overflow").is_catchable());
        assert!(RavenError::runtime("bad arg").is_catchable());
    }

    #[test]
    fn syntax_error_display_is_caret_free_summary() {
        let e = RavenError::Syntax {
            path: "room.rv".into(),
            line: 4,
            column: 9,
            message: "expected ';'".into(),
            excerpt: "  foo bar\n        ^".into(),
        };
        assert_eq!(e.to_string(), "room.rv:4:9: expected ';'");
    }
}
