//! Syntax-error reporting: logs a caret-annotated excerpt to the tracing
//! pipeline the same way the rest of the runtime logs, rather than printing
//! straight to stderr.

use raven_core::RavenError;

/// Log a syntax error at `error` level with its file/line/caret excerpt.
/// Called at every compile entry point once a parse fails -- the parser
/// itself just returns `Err`, matching "every parsing function returns
/// success/failure" with recovery left to the caller.
pub fn report(err: &RavenError) {
    if let RavenError::Syntax { path, line, column, message, excerpt } = err {
        tracing::error!(path, line, column, message, "{excerpt}");
    } else {
        tracing::error!("{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_does_not_panic_on_syntax_error() {
        let err = RavenError::Syntax {
            path: "room.rv".into(),
            line: 4,
            column: 9,
            message: "expected ';'".into(),
            excerpt: "  foo bar\n        ^".into(),
        };
        report(&err);
    }

    #[test]
    fn report_does_not_panic_on_non_syntax_error() {
        report(&RavenError::runtime("bad arg"));
    }
}
