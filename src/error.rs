use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// The probe-level error taxonomy of spec §7. Each variant maps to the exact
/// stable short string placed in `CheckResult.error`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    #[error("proxy_connect")]
    ProxyConnect,
    #[error("proxy_protocol")]
    ProxyProtocol,
    #[error("timeout")]
    Timeout,
    #[error("server_disconnect")]
    ServerDisconnect,
    #[error("bad_response")]
    BadResponse,
    #[error("invalid_url")]
    InvalidUrl,
    #[error("payload")]
    Payload,
    #[error("os")]
    Os,
}

impl ProbeErrorKind {
    /// The stable string recorded in `CheckResult.error`.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ProbeErrorKind::ProxyConnect => "proxy_connect",
            ProbeErrorKind::ProxyProtocol => "proxy_protocol",
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::ServerDisconnect => "server_disconnect",
            ProbeErrorKind::BadResponse => "bad_response",
            ProbeErrorKind::InvalidUrl => "invalid_url",
            ProbeErrorKind::Payload => "payload",
            ProbeErrorKind::Os => "os",
        }
    }
}

/// Unified error type for the proxy-checking service.
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Store semantics (spec §4.1, §7)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotExists(String),

    // Probe-level outcome, never silently swallowed outside the Prober
    // (spec §7's closing sentence: unenumerated errors must propagate).
    #[error("Probe failed: {0}")]
    Probe(ProbeErrorKind),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    /// An error outside the enumerated probe taxonomy. Per spec §7 this must
    /// be allowed to propagate rather than being collapsed into a failed
    /// CheckResult.
    #[error("Bug (unenumerated error escaped the probe taxonomy): {0}")]
    Bug(String),
}

pub type Result<T> = std::result::Result<T, CheckerError>;

impl CheckerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CheckerError::InvalidRequest(_)
            | CheckerError::UnsupportedProtocol(_)
            | CheckerError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            CheckerError::NotExists(_) => StatusCode::NOT_FOUND,
            CheckerError::Conflict(_) => StatusCode::CONFLICT,

            CheckerError::Database(_)
            | CheckerError::DatabaseConnection(_)
            | CheckerError::Probe(_)
            | CheckerError::Io(_)
            | CheckerError::Internal(_)
            | CheckerError::Bug(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Control-plane error responses keep the `{"result": <message>, "error":
/// true}` envelope fixed by spec §6/§7, rather than the teacher's bare
/// `{"error": msg}` body — spec.md's envelope binds here.
impl IntoResponse for CheckerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "result": self.to_string(),
            "error": true,
        });

        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for CheckerError {
    fn from(err: url::ParseError) -> Self {
        CheckerError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_error_kind_strings_match_spec_table() {
        assert_eq!(ProbeErrorKind::ProxyConnect.kind_str(), "proxy_connect");
        assert_eq!(ProbeErrorKind::ProxyProtocol.kind_str(), "proxy_protocol");
        assert_eq!(ProbeErrorKind::Timeout.kind_str(), "timeout");
        assert_eq!(ProbeErrorKind::ServerDisconnect.kind_str(), "server_disconnect");
        assert_eq!(ProbeErrorKind::BadResponse.kind_str(), "bad_response");
        assert_eq!(ProbeErrorKind::InvalidUrl.kind_str(), "invalid_url");
        assert_eq!(ProbeErrorKind::Payload.kind_str(), "payload");
        assert_eq!(ProbeErrorKind::Os.kind_str(), "os");
    }

    #[test]
    fn error_status_code_mapping() {
        assert_eq!(
            CheckerError::InvalidRequest("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CheckerError::NotExists("proxy 1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CheckerError::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
