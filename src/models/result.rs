//! CheckResult: the append-only outcome of a single (Proxy, CheckDefinition) probe.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one probe. `is_passed = true ∧ is_banned = true` is legal
/// (spec §3): the page loaded and matched both an alive and a ban assertion.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CheckResult {
    pub id: i64,
    pub proxy_id: i64,
    pub check_id: i64,
    pub is_passed: bool,
    pub is_banned: bool,
    /// `None` iff no HTTP response was received.
    pub status: Option<i32>,
    /// Elapsed seconds, always >= 0.
    pub time: f64,
    pub error: Option<String>,
    pub done_at: DateTime<Utc>,
}

/// A not-yet-persisted probe outcome, as produced by the Prober.
#[derive(Debug, Clone)]
pub struct NewCheckResult {
    pub proxy_id: i64,
    pub check_id: i64,
    pub is_passed: bool,
    pub is_banned: bool,
    pub status: Option<i32>,
    pub time: f64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_null_implies_not_passed_is_representable() {
        let result = NewCheckResult {
            proxy_id: 1,
            check_id: 1,
            is_passed: false,
            is_banned: false,
            status: None,
            time: 2.1,
            error: Some("timeout".into()),
        };
        assert!(result.status.is_none());
        assert!(!result.is_passed);
    }
}
