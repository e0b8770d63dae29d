//! Proxy-string ingestion (SPEC_FULL §11.1): parses the `[scheme://]host:port`
//! grammar (spec §6) and expands a scheme-less entry into one `NewProxy`
//! candidate per supported protocol, since the Prober cannot itself guess
//! which protocol a bare `host:port` speaks.

use crate::error::{CheckerError, Result};
use crate::models::{NewProxy, ProxyProtocol};

/// Parse one line of proxy input into the candidate `NewProxy` rows it
/// expands to. A scheme prefix (`http://`, `socks4://`, `socks5://`) pins
/// the protocol to a single candidate; its absence expands to all three.
pub fn expand_proxy_spec(raw: &str, recheck_every: Option<i64>) -> Result<Vec<NewProxy>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CheckerError::InvalidRequest("empty proxy spec".into()));
    }

    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, raw),
    };

    let (host, port_str) = rest
        .rsplit_once(':')
        .ok_or_else(|| CheckerError::InvalidRequest(format!("missing port in proxy spec: {raw}")))?;

    if host.is_empty() {
        return Err(CheckerError::InvalidRequest(format!("missing host in proxy spec: {raw}")));
    }

    let port: i32 = port_str
        .parse()
        .map_err(|_| CheckerError::InvalidRequest(format!("invalid port in proxy spec: {raw}")))?;
    if !(1..=65535).contains(&port) {
        return Err(CheckerError::InvalidRequest(format!("port out of range in proxy spec: {raw}")));
    }

    let protocols: Vec<ProxyProtocol> = match scheme {
        Some(s) => vec![s
            .parse::<ProxyProtocol>()
            .map_err(|_| CheckerError::InvalidRequest(format!("unsupported scheme in proxy spec: {raw}")))?],
        None => ProxyProtocol::concrete_candidates().to_vec(),
    };

    Ok(protocols
        .into_iter()
        .map(|protocol| NewProxy {
            host: host.to_string(),
            port,
            protocol,
            recheck_every,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_prefixed_spec_expands_to_a_single_candidate() {
        let candidates = expand_proxy_spec("socks5://10.0.0.1:1080", None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].protocol, ProxyProtocol::Socks5);
        assert_eq!(candidates[0].host, "10.0.0.1");
        assert_eq!(candidates[0].port, 1080);
    }

    #[test]
    fn bare_host_port_expands_to_all_protocols() {
        let candidates = expand_proxy_spec("10.0.0.1:3128", Some(60)).unwrap();
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.host == "10.0.0.1" && c.port == 3128));
        assert!(candidates.iter().all(|c| c.recheck_every == Some(60)));
    }

    #[test]
    fn missing_port_is_rejected() {
        assert!(expand_proxy_spec("10.0.0.1", None).is_err());
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(expand_proxy_spec("10.0.0.1:notaport", None).is_err());
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(expand_proxy_spec("ftp://10.0.0.1:21", None).is_err());
    }

    #[test]
    fn empty_spec_is_rejected() {
        assert!(expand_proxy_spec("   ", None).is_err());
    }
}
