// =============================================================================
// Engine error taxonomy — maps every failure to a closed wire error code
// =============================================================================
//
// Four propagation policies apply (see the handler dispatch in `dispatcher.rs`):
// 1. Transient/rate-limit errors are caught locally by the identity cascade
// and never reach this type unless every cascade step exhausts itself.
// 2. Expected validation failures short-circuit with a specific code and a
// message that is safe to hand back to the caller.
// 3. Partial pipeline failures are collected into `PipelineRunResult` rather
// than returned as an `EngineError` at all.
// 4. Anything else is an unexpected failure: the `Debug` representation is
// logged in full, but the wire only ever sees `HANDLER_ERROR`.
// =============================================================================

use serde::Serialize;
use thiserror::Error;

/// The closed set of error codes documented in the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    InvalidCommand,
    PayloadTooLarge,
    UnknownCommand,
    HandlerError,
    BridgeStartupFailed,
    BridgeTimeout,
    BridgeDesync,
    TrAuthError,
    Tr2faInvalidState,
    Tr2faInvalid,
    TrRateLimited,
    DataFetchFailed,
    TickerInvalid,
    SecurityDelisted,
    AdapterNetwork,
    AdapterFormat,
    ManualUploadRequired,
    ResolveUnresolved,
    PipelinePartial,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCommand => "INVALID_COMMAND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::HandlerError => "HANDLER_ERROR",
            Self::BridgeStartupFailed => "BRIDGE_STARTUP_FAILED",
            Self::BridgeTimeout => "BRIDGE_TIMEOUT",
            Self::BridgeDesync => "BRIDGE_DESYNC",
            Self::TrAuthError => "TR_AUTH_ERROR",
            Self::Tr2faInvalidState => "TR_2FA_INVALID_STATE",
            Self::Tr2faInvalid => "TR_2FA_INVALID",
            Self::TrRateLimited => "TR_RATE_LIMITED",
            Self::DataFetchFailed => "DATA_FETCH_FAILED",
            Self::TickerInvalid => "TICKER_INVALID",
            Self::SecurityDelisted => "SECURITY_DELISTED",
            Self::AdapterNetwork => "ADAPTER_NETWORK",
            Self::AdapterFormat => "ADAPTER_FORMAT",
            Self::ManualUploadRequired => "MANUAL_UPLOAD_REQUIRED",
            Self::ResolveUnresolved => "RESOLVE_UNRESOLVED",
            Self::PipelinePartial => "PIPELINE_PARTIAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level engine error. Every variant carries enough context for the
/// structured log but only exposes `code()` + a user-safe `message()` to the
/// wire.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("malformed command envelope: {0}")]
    InvalidCommand(String),

    #[error("frame exceeds the 1 MiB limit")]
    PayloadTooLarge,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("handler panicked or returned an unexpected error: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("broker bridge failed to start: {0}")]
    BridgeStartupFailed(String),

    #[error("broker bridge request timed out after {0:?}")]
    BridgeTimeout(std::time::Duration),

    #[error("broker bridge response id mismatch (expected {expected}, got {got})")]
    BridgeDesync { expected: String, got: String },

    #[error("broker authentication error: {0}")]
    TrAuth(String),

    #[error("2FA submission is only valid while WAITING_FOR_2FA")]
    Tr2faInvalidState,

    #[error("2FA code rejected by broker")]
    Tr2faInvalid,

    #[error("broker is rate limiting this client")]
    TrRateLimited,

    #[error("data fetch failed: {0}")]
    DataFetchFailed(String),

    #[error("'{0}' is not a syntactically valid ISIN")]
    TickerInvalid(String),

    #[error("security {0} is delisted")]
    SecurityDelisted(String),

    #[error("adapter network error: {0}")]
    AdapterNetwork(String),

    #[error("adapter returned malformed data: {0}")]
    AdapterFormat(String),

    #[error("ETF {0} has no registered adapter; manual holdings upload required")]
    ManualUploadRequired(String),

    #[error("identifier '{0}' could not be resolved to an ISIN")]
    ResolveUnresolved(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// Map to the closed wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidCommand(_) => ErrorCode::InvalidCommand,
            Self::PayloadTooLarge => ErrorCode::PayloadTooLarge,
            Self::UnknownCommand(_) => ErrorCode::UnknownCommand,
            Self::Handler(_) | Self::Io(_) | Self::Json(_) | Self::Database(_) => {
                ErrorCode::HandlerError
            }
            Self::BridgeStartupFailed(_) => ErrorCode::BridgeStartupFailed,
            Self::BridgeTimeout(_) => ErrorCode::BridgeTimeout,
            Self::BridgeDesync { .. } => ErrorCode::BridgeDesync,
            Self::TrAuth(_) => ErrorCode::TrAuthError,
            Self::Tr2faInvalidState => ErrorCode::Tr2faInvalidState,
            Self::Tr2faInvalid => ErrorCode::Tr2faInvalid,
            Self::TrRateLimited => ErrorCode::TrRateLimited,
            Self::DataFetchFailed(_) => ErrorCode::DataFetchFailed,
            Self::TickerInvalid(_) => ErrorCode::TickerInvalid,
            Self::SecurityDelisted(_) => ErrorCode::SecurityDelisted,
            Self::AdapterNetwork(_) => ErrorCode::AdapterNetwork,
            Self::AdapterFormat(_) => ErrorCode::AdapterFormat,
            Self::ManualUploadRequired(_) => ErrorCode::ManualUploadRequired,
            Self::ResolveUnresolved(_) => ErrorCode::ResolveUnresolved,
        }
    }

    /// A message safe to place on the wire. Internal-only variants
    /// (`Handler`, `Io`, `Json`, `Database`) are flattened to a generic
    /// message — operators get specifics from the log, callers do not.
    pub fn public_message(&self) -> String {
        match self {
            Self::Handler(_) | Self::Io(_) | Self::Json(_) | Self::Database(_) => {
                "internal error — see logs".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
