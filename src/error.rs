use thiserror::Error;

/// The two error classes a run can hit: configuration problems that must
/// fail before any core starts, and per-core trace faults that should not
/// take the rest of the run down with them.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("trace error in core {core} at line {line}: {reason}")]
    Trace {
        core: usize,
        line: usize,
        reason: String,
    },
}
