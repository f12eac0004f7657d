use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Inconsistencies the classifier refuses to guess its way around.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("expected at most one SPF `fail` auth result, found {0}")]
    DuplicateSpfFail(usize),

    #[error("expected at most one SPF `neutral` auth result, found {0}")]
    DuplicateSpfNeutral(usize),

    #[error("SPF failed without a fail or neutral verdict, yet the record is marked SPF-aligned")]
    AlignedWithoutVerdict,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("aggregate file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed input at {location}: {message}")]
    MalformedInput { location: String, message: String },

    #[error(
        "invariant violated in report {report}, record {record} (envelope from {envelope_from}): {violation}"
    )]
    InvariantViolation {
        report: usize,
        record: usize,
        envelope_from: String,
        violation: Violation,
    },
}

impl ReportError {
    pub(crate) fn malformed(location: impl Into<String>, message: impl ToString) -> Self {
        ReportError::MalformedInput {
            location: location.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReportError::FileNotFound(PathBuf::from("/tmp/missing.json"));
        assert_eq!(
            err.to_string(),
            "aggregate file not found: /tmp/missing.json"
        );

        let err = ReportError::malformed("report 2", "missing field `records`");
        assert!(err.to_string().contains("report 2"));
        assert!(err.to_string().contains("missing field `records`"));

        let err = ReportError::InvariantViolation {
            report: 0,
            record: 3,
            envelope_from: "example.org".to_string(),
            violation: Violation::DuplicateSpfFail(2),
        };
        let text = err.to_string();
        assert!(text.contains("report 0, record 3"));
        assert!(text.contains("example.org"));
        assert!(text.contains("found 2"));
    }
}
