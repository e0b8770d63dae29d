//! Proxy entity: a remote HTTP/SOCKS forward proxy identified by (host, port, protocol).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CheckerError, Result};

/// Transport protocol spoken by a proxy.
///
/// `Unspecified` only ever appears transiently during ingestion: it is
/// expanded into one `Proxy` per candidate protocol before anything is
/// persisted (see `crate::ingest::expand_proxy_spec`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Socks4,
    Socks5,
    Unspecified,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
            ProxyProtocol::Unspecified => "unspecified",
        }
    }

    /// The concrete protocols an `Unspecified` proxy should be expanded into.
    pub fn concrete_candidates() -> [ProxyProtocol; 3] {
        [ProxyProtocol::Http, ProxyProtocol::Socks4, ProxyProtocol::Socks5]
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyProtocol {
    type Err = CheckerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyProtocol::Http),
            "socks4" => Ok(ProxyProtocol::Socks4),
            "socks5" => Ok(ProxyProtocol::Socks5),
            "" | "unspecified" => Ok(ProxyProtocol::Unspecified),
            other => Err(CheckerError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ProxyProtocol {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for ProxyProtocol {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ProxyProtocol {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(ProxyProtocol::from_str(&s)?)
    }
}

/// A persisted Proxy row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Proxy {
    pub id: i64,
    pub host: String,
    pub port: i32,
    pub protocol: ProxyProtocol,
    /// Seconds between rechecks. `None` means one-shot (never re-dispatched).
    pub recheck_every: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Proxy {
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A new Proxy awaiting insertion (no id / created_at yet).
#[derive(Debug, Clone)]
pub struct NewProxy {
    pub host: String,
    pub port: i32,
    pub protocol: ProxyProtocol,
    pub recheck_every: Option<i64>,
}

/// A Proxy joined with its derived liveness / ban state, as returned by
/// `Store::list_proxies`.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRow {
    pub id: i64,
    pub host: String,
    pub port: i32,
    pub protocol: ProxyProtocol,
    pub recheck_every: Option<i64>,
    pub alive: bool,
    pub check_ids: Vec<i64>,
    pub banned_on: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_roundtrips_through_str() {
        for p in [
            ProxyProtocol::Http,
            ProxyProtocol::Socks4,
            ProxyProtocol::Socks5,
        ] {
            assert_eq!(ProxyProtocol::from_str(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn empty_scheme_is_unspecified() {
        assert_eq!(
            ProxyProtocol::from_str("").unwrap(),
            ProxyProtocol::Unspecified
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(ProxyProtocol::from_str("ftp").is_err());
    }

    #[test]
    fn host_port_formats_as_authority() {
        let proxy = Proxy {
            id: 1,
            host: "10.0.0.1".into(),
            port: 3128,
            protocol: ProxyProtocol::Http,
            recheck_every: Some(60),
            created_at: Utc::now(),
        };
        assert_eq!(proxy.host_port(), "10.0.0.1:3128");
    }
}
