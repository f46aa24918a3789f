//! Core error types for regen-core.
//!
//! Only infrastructure failures are errors. Domain outcomes such as a
//! missing locator, a rejected cycle or an unreachable kind are variants of
//! each operation's outcome enum and never show up here.

use regen_storage::StorageError;
use thiserror::Error;

/// Errors produced by the pipeline components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The underlying store failed. Propagated unmodified.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored document no longer decodes into its record type.
    #[error("corrupt record {relation}/{key}: {reason}")]
    CorruptRecord {
        relation: &'static str,
        key: String,
        reason: String,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_pass_through_display() {
        let err: CoreError = StorageError::Migration("boom".into()).into();
        assert_eq!(err.to_string(), "migration error: boom");
    }

    #[test]
    fn corrupt_record_display() {
        let err = CoreError::CorruptRecord {
            relation: "entry",
            key: "gen:x".into(),
            reason: "missing field `inputHash`".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt record entry/gen:x: missing field `inputHash`"
        );
    }
}
