//! Multi-protocol proxy transport (spec §4.3 step 2): establishes the raw
//! connection through an HTTP, SOCKS4, or SOCKS5 proxy to a target host/port.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::{CheckerError, ProbeErrorKind};
use crate::models::{Proxy, ProxyProtocol};

/// A connection established through a proxy, ready for an application-level
/// HTTP exchange.
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyConnection for T {}

pub struct Transport;

impl Transport {
    /// Connect to `target_host:target_port` through `proxy`, per spec §4.3
    /// step 2: SOCKS4/SOCKS5 proxies use a SOCKS connector, HTTP proxies use
    /// a CONNECT tunnel. Errors are mapped into the probe-level taxonomy
    /// (spec §7) so the Prober can record a stable `error` kind.
    #[instrument(skip(proxy), fields(proxy_id = proxy.id, protocol = %proxy.protocol))]
    pub async fn connect(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>, CheckerError> {
        match proxy.protocol {
            ProxyProtocol::Http => Self::connect_http(proxy, target_host, target_port).await,
            ProxyProtocol::Socks4 => Self::connect_socks4(proxy, target_host, target_port).await,
            ProxyProtocol::Socks5 => Self::connect_socks5(proxy, target_host, target_port).await,
            ProxyProtocol::Unspecified => Err(CheckerError::Probe(ProbeErrorKind::InvalidUrl)),
        }
    }

    async fn connect_http(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>, CheckerError> {
        let mut stream = TcpStream::connect(proxy.host_port())
            .await
            .map_err(|_| CheckerError::Probe(ProbeErrorKind::ProxyConnect))?;

        let request = Self::build_connect_request(target_host, target_port);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|_| CheckerError::Probe(ProbeErrorKind::ProxyProtocol))?;

        let mut buf = [0u8; 512];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|_| CheckerError::Probe(ProbeErrorKind::ProxyProtocol))?;

        let response = String::from_utf8_lossy(&buf[..n]);
        let status_line = response
            .lines()
            .next()
            .ok_or(CheckerError::Probe(ProbeErrorKind::ProxyProtocol))?;

        if !status_line.contains(" 200 ") {
            debug!(status_line, "CONNECT refused by upstream proxy");
            return Err(CheckerError::Probe(ProbeErrorKind::ProxyProtocol));
        }

        Ok(Box::new(stream))
    }

    async fn connect_socks4(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>, CheckerError> {
        let stream = Socks4Stream::connect(proxy.host_port(), (target_host, target_port))
            .await
            .map_err(|e| Self::map_socks_error(e))?;

        Ok(Box::new(TokioSocksAdapter::Socks4(stream)))
    }

    async fn connect_socks5(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>, CheckerError> {
        let stream = Socks5Stream::connect(proxy.host_port(), (target_host, target_port))
            .await
            .map_err(|e| Self::map_socks_error(e))?;

        Ok(Box::new(TokioSocksAdapter::Socks5(stream)))
    }

    fn map_socks_error(err: tokio_socks::Error) -> CheckerError {
        match err {
            tokio_socks::Error::Io(_) => CheckerError::Probe(ProbeErrorKind::ProxyConnect),
            _ => CheckerError::Probe(ProbeErrorKind::ProxyProtocol),
        }
    }

    fn build_connect_request(target_host: &str, target_port: u16) -> String {
        format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: Keep-Alive\r\n\r\n",
            host = target_host,
            port = target_port
        )
    }

    /// Wrap an already-proxied stream in a TLS handshake (spec §4.3 step 2/4:
    /// `https://` check URLs need a TLS ClientHello, not a plaintext
    /// request, over the tunnel/SOCKS target). Certificate verification is
    /// disabled per spec §4.3: the system probes arbitrary, often hostile
    /// endpoints with no trust anchor to validate against.
    #[instrument(skip(stream))]
    pub async fn upgrade_tls(
        stream: Box<dyn ProxyConnection>,
        target_host: &str,
    ) -> Result<Box<dyn ProxyConnection>, CheckerError> {
        let connector = TlsConnector::from(insecure_tls_config());

        let server_name = ServerName::try_from(target_host.to_string())
            .map_err(|_| CheckerError::Probe(ProbeErrorKind::InvalidUrl))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| {
                debug!(error = %e, "TLS handshake over proxy tunnel failed");
                CheckerError::Probe(ProbeErrorKind::ProxyProtocol)
            })?;

        Ok(Box::new(tls_stream))
    }
}

/// A `ServerCertVerifier` that accepts every presented certificate chain.
/// Checks target arbitrary, often self-signed or expired, proxied endpoints;
/// there is no trust anchor the real deployment could pin against.
#[derive(Debug)]
struct NoServerVerification;

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

fn insecure_tls_config() -> Arc<ClientConfig> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    CONFIG
        .get_or_init(|| {
            let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
            let config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification))
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// Adapter unifying the two distinct `tokio_socks` stream types behind one
/// `AsyncRead + AsyncWrite` object, so `Transport::connect` can return a
/// single boxed type regardless of SOCKS version.
enum TokioSocksAdapter {
    Socks4(Socks4Stream<TcpStream>),
    Socks5(Socks5Stream<TcpStream>),
}

impl AsyncRead for TokioSocksAdapter {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TokioSocksAdapter::Socks4(s) => Pin::new(s).poll_read(cx, buf),
            TokioSocksAdapter::Socks5(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TokioSocksAdapter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TokioSocksAdapter::Socks4(s) => Pin::new(s).poll_write(cx, buf),
            TokioSocksAdapter::Socks5(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TokioSocksAdapter::Socks4(s) => Pin::new(s).poll_flush(cx),
            TokioSocksAdapter::Socks5(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TokioSocksAdapter::Socks4(s) => Pin::new(s).poll_shutdown(cx),
            TokioSocksAdapter::Socks5(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_has_correct_authority() {
        let req = Transport::build_connect_request("example.test", 443);
        assert!(req.starts_with("CONNECT example.test:443 HTTP/1.1\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }
}
