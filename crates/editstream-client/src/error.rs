use editstream_proto::ErrorInfo;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The stream ended without a `complete` or `error` event.
    #[error("connection closed before the operation finished")]
    TransportClosed,

    #[error("operation failed: {}", .0.message)]
    Operation(ErrorInfo),
}
