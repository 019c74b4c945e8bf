//! The TLS handler: a thin wrapper around `tokio-rustls` used for both
//! STARTTLS upgrades and old-style TLS-on-connect. Certificate validation
//! policy itself belongs to `rustls`/`rustls-native-certs`; this module only
//! converts their failures into the crate's `TlsCertError` taxonomy.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::TlsCertError;

/// Builds a connector trusting the platform's native CA roots. Construct
/// once per connector run and reuse across STARTTLS/old-SSL attempts.
pub fn native_connector() -> Result<TlsConnector, TlsCertError> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| TlsCertError::Internal(e.to_string()))?;
    for cert in native {
        roots
            .add(cert)
            .map_err(|e| TlsCertError::Internal(e.to_string()))?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

fn map_handshake_error(e: std::io::Error) -> TlsCertError {
    match e.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>()) {
        Some(rustls::Error::InvalidCertificate(_)) => TlsCertError::Invalid,
        Some(rustls::Error::NoCertificatesPresented) => TlsCertError::NoCertificate,
        Some(other) => TlsCertError::Unknown(other.to_string()),
        None => TlsCertError::Internal(e.to_string()),
    }
}

/// Performs the client TLS handshake over `io`, validating the certificate
/// chain against `hostname`.
pub async fn handshake<Io>(
    connector: &TlsConnector,
    hostname: &str,
    io: Io,
) -> Result<TlsStream<Io>, TlsCertError>
where
    Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let server_name = ServerName::try_from(hostname.to_owned())
        .map_err(|_| TlsCertError::NameMismatch)?;
    connector
        .connect(server_name, io)
        .await
        .map_err(map_handshake_error)
}
