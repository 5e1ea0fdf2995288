use thiserror::Error;

/// The error taxonomy for the bandwidth scanner core.
///
/// Every variant corresponds to one outcome a fetch, a circuit build, or a
/// control-plane round trip can produce. Per-fetch errors are caught at the
/// orchestrator's fetch boundary and converted into a failure
/// [`crate::record::MeasurementRecord`]; they do not propagate past that
/// point. Sink and control-plane errors propagate and terminate the scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("circuit did not reach READY within {0:?}")]
    BuildTimeout(std::time::Duration),

    #[error("circuit build failed: {0}")]
    BuildFailure(String),

    #[error("SOCKS/TCP negotiation failed: {0}")]
    ConnectError(String),

    #[error("request did not complete within {0:?}")]
    RequestTimeout(std::time::Duration),

    #[error("download incomplete: expected {expected} bytes, got {got}")]
    DownloadIncomplete { expected: usize, got: usize },

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("control protocol error: {0}")]
    ControlProtocolError(String),

    #[error("relay {0} not found in current consensus")]
    DescriptorUnavailable(String),

    #[error("write error: {0}")]
    WriteError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    /// The short stringly representation used in a failure
    /// [`crate::record::MeasurementRecord`]'s `failure` field.
    pub fn short(&self) -> String {
        match self {
            ScanError::BuildTimeout(_) => "build_timeout".into(),
            ScanError::BuildFailure(msg) => format!("build_failure: {msg}"),
            ScanError::ConnectError(msg) => format!("connect_error: {msg}"),
            ScanError::RequestTimeout(_) => "timeout".into(),
            ScanError::DownloadIncomplete { expected, got } => {
                format!("download_incomplete: expected {expected}, got {got}")
            }
            ScanError::TransportError(msg) => format!("transport_error: {msg}"),
            ScanError::ControlProtocolError(msg) => format!("control_error: {msg}"),
            ScanError::DescriptorUnavailable(fp) => format!("descriptor_unavailable: {fp}"),
            ScanError::WriteError(msg) => format!("write_error: {msg}"),
            ScanError::Config(msg) => format!("config_error: {msg}"),
            ScanError::Io(e) => format!("io_error: {e}"),
            ScanError::Serialization(e) => format!("serialization_error: {e}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
