//! IMAP transport setup and login
//!
//! Opens a TCP connection according to the account's [`Encryption`]
//! mode, wraps it in TLS where required, and authenticates. Each step
//! is bounded by the connect timeout.

use crate::account::{Encryption, ImapAccount};
use crate::error::{Error, Result};
use async_imap::Session;
use futures::io::{AsyncRead, AsyncWrite};
use rustls::pki_types::ServerName;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info};

/// Anything async-imap can speak over.
pub trait ImapTransport: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> ImapTransport for T {}

/// An authenticated IMAP session over any of the supported transports.
pub type ImapSession = Session<Box<dyn ImapTransport>>;

/// TLS policy for outgoing connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsPolicy {
    /// Skip certificate verification (self-signed test servers, local
    /// bridges).
    pub accept_invalid_certs: bool,
}

impl TlsPolicy {
    fn connector(self) -> Result<TlsConnector> {
        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

        let config = if self.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };
        Ok(TlsConnector::from(Arc::new(config)))
    }
}

/// Run `fut`, failing with [`Error::Timeout`] after `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    step: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(step))?
}

/// Open a transport to `account` and log in.
///
/// Network and TLS failures are [`Error::Connection`] / [`Error::Tls`];
/// a rejected LOGIN is [`Error::Authentication`].
pub async fn connect(
    account: &ImapAccount,
    tls: TlsPolicy,
    timeout: Duration,
) -> Result<ImapSession> {
    account.validate()?;

    let transport = bounded(timeout, "connect", open_transport(account, tls)).await?;
    let client = async_imap::Client::new(transport);

    let session = bounded(timeout, "login", async move {
        client
            .login(&account.username, &account.password)
            .await
            .map_err(|(e, _)| match e {
                async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                    Error::Authentication(msg)
                }
                other => Error::Connection(format!("Login failed: {other}")),
            })
    })
    .await?;

    info!(host = %account.host, "Connected to IMAP server");
    Ok(session)
}

async fn open_transport(account: &ImapAccount, tls: TlsPolicy) -> Result<Box<dyn ImapTransport>> {
    let addr = account.address();
    debug!(%addr, encryption = ?account.encryption, "Connecting to IMAP server");

    let tcp_stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::Connection(format!("{addr}: {e}")))?;

    match account.encryption {
        Encryption::None => Ok(Box::new(tcp_stream.compat())),
        Encryption::Ssl => {
            let tls_stream = handshake(&account.host, tls, tcp_stream).await?;
            Ok(Box::new(tls_stream.compat()))
        }
        Encryption::Starttls => {
            let mut client = async_imap::Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;

            let inner = client.into_inner().into_inner();
            let tls_stream = handshake(&account.host, tls, inner).await?;
            Ok(Box::new(tls_stream.compat()))
        }
    }
}

async fn handshake(
    host: &str,
    tls: TlsPolicy,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    tls.connector()?
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))
}

/// Certificate verifier that accepts all certificates.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
