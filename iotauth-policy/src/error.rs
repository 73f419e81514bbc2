use tracing_error::SpanTrace;

/// Errors raised while talking to the external policy engine or while
/// enforcing a precondition before a tuple write (§4.4).
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy engine transport error: {status}")]
    Transport {
        status: tonic::Status,
        span_trace: SpanTrace,
    },
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl From<tonic::Status> for PolicyError {
    fn from(status: tonic::Status) -> Self {
        Self::Transport {
            status,
            span_trace: SpanTrace::capture(),
        }
    }
}
