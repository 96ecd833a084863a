//! Core error types for the Splice export engine.

/// A specialized Result type for Splice operations.
pub type SpliceResult<T> = Result<T, SpliceError>;

/// Top-level error type encompassing every stage of an export job.
#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    /// The decode/encode capability rejected the requested configuration.
    #[error("unsupported configuration: {0}")]
    ConfigUnsupported(String),

    /// The source container could not be parsed.
    #[error("demux error: {0}")]
    Demux(String),

    /// No decoder configuration could be found for an asset.
    #[error("parameter set missing: {0}")]
    ParamSetMissing(String),

    /// The decoder produced no frame within the backpressure timeout.
    #[error("decode stalled: no frame after {waited_ms}ms with {outstanding} requests outstanding")]
    DecodeStall { waited_ms: u64, outstanding: usize },

    /// The muxer finalized a container with zero bytes.
    #[error("muxer produced an empty container")]
    MuxEmptyOutput,

    /// Cooperative cancellation was observed.
    #[error("export cancelled")]
    Cancelled,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("asset error: {message} ({id})")]
    Asset { message: String, id: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpliceError {
    /// Create an asset error.
    pub fn asset(message: impl Into<String>, id: impl Into<String>) -> Self {
        SpliceError::Asset {
            message: message.into(),
            id: id.into(),
        }
    }

    /// Cancellation is a terminal outcome, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SpliceError::Cancelled)
    }

    /// Collapse a list of validation problems into one error.
    pub fn from_many(errors: Vec<SpliceError>) -> Self {
        let joined = errors
            .iter()
            .map(|e| match e {
                SpliceError::Validation(msg) => msg.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        SpliceError::Validation(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stall_display() {
        let err = SpliceError::DecodeStall {
            waited_ms: 2000,
            outstanding: 9,
        };
        assert_eq!(
            err.to_string(),
            "decode stalled: no frame after 2000ms with 9 requests outstanding"
        );
    }

    #[test]
    fn test_asset_error_display() {
        let err = SpliceError::asset("dangling content reference", "clip-7");
        assert!(err.to_string().contains("dangling content reference"));
        assert!(err.to_string().contains("clip-7"));
    }

    #[test]
    fn test_cancelled_is_not_a_failure_kind() {
        assert!(SpliceError::Cancelled.is_cancelled());
        assert!(!SpliceError::MuxEmptyOutput.is_cancelled());
    }

    #[test]
    fn test_from_many_joins_messages() {
        let err = SpliceError::from_many(vec![
            SpliceError::Validation("fps must be positive".into()),
            SpliceError::asset("missing", "a1"),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("validation error: fps must be positive; "));
        assert!(msg.contains("a1"));
    }
}
