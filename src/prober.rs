//! Prober (spec §4.3): performs a single HTTP request through one Proxy for
//! one CheckDefinition, honouring a hard overall deadline, and emits one
//! CheckResult.

use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::rt::TokioIo;
use rand::seq::SliceRandom;
use tracing::{debug, instrument};
use url::Url;

use crate::assertion;
use crate::error::{CheckerError, ProbeErrorKind};
use crate::models::result::NewCheckResult;
use crate::models::{CheckDefinition, Proxy};
use crate::transport::Transport;

/// A fixed bundle of request headers used to mask the client's fingerprint
/// (spec §4.3 step 3). Selected at random per-probe from a small built-in
/// pool, configured via `ProberConfig::session_profile_pool` (SPEC_FULL
/// §10.3) rather than hardcoded, so a deployment can swap the pool without a
/// rebuild.
#[derive(Debug, Clone, Copy)]
pub struct SessionProfile {
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
}

/// The built-in pool `ProberConfig::session_profile_pool` defaults to.
pub fn default_session_profiles() -> Vec<SessionProfile> {
    vec![
        SessionProfile {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            accept_language: "en-US,en;q=0.9",
        },
        SessionProfile {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            accept_language: "en-GB,en;q=0.8",
        },
        SessionProfile {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            accept_language: "en-US,en;q=0.5",
        },
    ]
}

fn random_session_profile(pool: &[SessionProfile]) -> SessionProfile {
    *pool
        .choose(&mut rand::thread_rng())
        .expect("session profile pool is non-empty")
}

/// Run one probe: Proxy P against CheckDefinition C. Pure with respect to the
/// Store — the caller persists the returned `NewCheckResult`.
#[instrument(skip(proxy, check, session_profiles), fields(proxy_id = proxy.id, check_id = check.id))]
pub async fn probe(
    proxy: &Proxy,
    check: &CheckDefinition,
    session_profiles: &[SessionProfile],
) -> NewCheckResult {
    let t0 = Instant::now();
    let deadline = Duration::from_secs(check.timeout_secs.max(0) as u64);

    match tokio::time::timeout(deadline, run_probe(proxy, check, session_profiles)).await {
        Ok(Ok((status, body))) => finish_success(proxy, check, t0, status, &body),
        Ok(Err(kind)) => finish_failure(proxy, check, t0, kind),
        Err(_) => finish_failure(proxy, check, t0, ProbeErrorKind::Timeout),
    }
}

async fn run_probe(
    proxy: &Proxy,
    check: &CheckDefinition,
    session_profiles: &[SessionProfile],
) -> Result<(u16, String), ProbeErrorKind> {
    let url = Url::parse(&check.url).map_err(|_| ProbeErrorKind::InvalidUrl)?;
    let host = url.host_str().ok_or(ProbeErrorKind::InvalidUrl)?;
    let port = url
        .port_or_known_default()
        .ok_or(ProbeErrorKind::InvalidUrl)?;

    let stream = Transport::connect(proxy, host, port)
        .await
        .map_err(|e| match e {
            CheckerError::Probe(kind) => kind,
            _ => ProbeErrorKind::Os,
        })?;

    let stream = if url.scheme() == "https" {
        Transport::upgrade_tls(stream, host)
            .await
            .map_err(|e| match e {
                CheckerError::Probe(kind) => kind,
                _ => ProbeErrorKind::ProxyProtocol,
            })?
    } else {
        stream
    };

    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|_| ProbeErrorKind::ProxyProtocol)?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "proxied connection task ended");
        }
    });

    let profile = random_session_profile(session_profiles);
    let authority = match url.port() {
        Some(p) => format!("{host}:{p}"),
        None => host.to_string(),
    };

    let request = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", authority)
        .header("User-Agent", profile.user_agent)
        .header("Accept", profile.accept)
        .header("Accept-Language", profile.accept_language)
        .header("Connection", "close")
        .body(Empty::<Bytes>::new())
        .map_err(|_| ProbeErrorKind::InvalidUrl)?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| {
            if e.is_closed() {
                ProbeErrorKind::ServerDisconnect
            } else if e.is_parse() {
                ProbeErrorKind::BadResponse
            } else {
                ProbeErrorKind::ProxyProtocol
            }
        })?;

    let status = response.status().as_u16();

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|_| ProbeErrorKind::Payload)?
        .to_bytes();

    let body = String::from_utf8_lossy(&body_bytes).into_owned();

    Ok((status, body))
}

fn finish_success(
    proxy: &Proxy,
    check: &CheckDefinition,
    t0: Instant,
    status: u16,
    body: &str,
) -> NewCheckResult {
    let status_ok = check.expected_status.is_empty()
        || check.expected_status.contains(&(status as i32));

    let outcome = assertion::evaluate(body, &check.xpath_assertions);

    NewCheckResult {
        proxy_id: proxy.id,
        check_id: check.id,
        is_passed: status_ok && outcome.is_passed,
        is_banned: outcome.is_banned,
        status: Some(status as i32),
        time: t0.elapsed().as_secs_f64(),
        error: None,
    }
}

fn finish_failure(
    proxy: &Proxy,
    check: &CheckDefinition,
    t0: Instant,
    kind: ProbeErrorKind,
) -> NewCheckResult {
    NewCheckResult {
        proxy_id: proxy.id,
        check_id: check.id,
        is_passed: false,
        is_banned: false,
        status: None,
        time: t0.elapsed().as_secs_f64(),
        error: Some(kind.kind_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use chrono::Utc;

    fn test_proxy() -> Proxy {
        Proxy {
            id: 1,
            host: "127.0.0.1".into(),
            port: 1,
            protocol: ProxyProtocol::Http,
            recheck_every: None,
            created_at: Utc::now(),
        }
    }

    fn test_check(timeout_secs: i32) -> CheckDefinition {
        CheckDefinition {
            id: 1,
            name: None,
            url: "http://example.test/".into(),
            expected_status: vec![200],
            xpath_assertions: vec![],
            timeout_secs,
            netloc: "http://example.test".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unreachable_proxy_times_out_and_records_timeout_kind() {
        // Port 1 on loopback is not listening; connect fails quickly, but we
        // still exercise the full timeout-wrapped path end to end.
        let profiles = default_session_profiles();
        let result = probe(&test_proxy(), &test_check(1), &profiles).await;
        assert!(!result.is_passed);
        assert!(!result.is_banned);
        assert!(result.status.is_none());
        assert!(result.error.is_some());
        assert!(result.time >= 0.0);
    }

    #[test]
    fn session_profile_pool_is_non_empty() {
        let pool = default_session_profiles();
        let profile = random_session_profile(&pool);
        assert!(!profile.user_agent.is_empty());
    }
}
