use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the particle store and the execution loop.
///
/// Store lookups surface `InvalidIndex`/`NotFound`/`AmbiguousIdentity` to the
/// caller of the mutating operation; everything under `InvalidArgument` is
/// rejected before a run starts. Recoverable per-particle failures never show
/// up here, they are resolved inside the kernel via the recovery policy.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter (conflicting end conditions, mismatched
    /// array lengths, non-positive repeat interval, unknown attribute, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A requested in-bracket slot does not exist.
    #[error("slot {slot} out of range for bracket {bracket}")]
    InvalidIndex { bracket: usize, slot: usize },

    /// A global index or particle identity could not be resolved.
    #[error("particle not found: {0}")]
    NotFound(String),

    /// More than one record carries the same identity (a bug upstream).
    #[error("particle id {0} matches more than one record")]
    AmbiguousIdentity(u64),

    /// A position outside the domain covered by the field data.
    #[error("position (lon={0}, lat={1}) outside the field domain")]
    OutOfDomain(f64, f64),

    /// Input data for the requested time cannot be made resident.
    #[error("input data unavailable at time {0}")]
    InputUnavailable(f64),

    /// A kernel failure the recovery policy could not resolve.
    #[error("fatal kernel failure: {0}")]
    FatalKernel(String),

    /// Snapshot output could not be written.
    #[error("output failed: {0}")]
    Output(String),

    /// Propagated I/O errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidArgument("lon and lat lengths differ".to_string());
        let msg = format!("{}", e);
        assert!(msg.contains("invalid argument"));
        assert!(msg.contains("lon"));

        let e = Error::InvalidIndex { bracket: 3, slot: 4100 };
        assert!(format!("{}", e).contains("bracket 3"));
    }
}
