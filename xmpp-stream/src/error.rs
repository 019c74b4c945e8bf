//! The error taxonomy shared by every component in this crate, grouped by
//! domain the way the design doc groups them.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum ResolverError {
    NotFound,
    TemporaryFailure(String),
    Internal(String),
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResolverError::NotFound => write!(f, "no address found"),
            ResolverError::TemporaryFailure(m) => write!(f, "temporary resolver failure: {}", m),
            ResolverError::Internal(m) => write!(f, "internal resolver error: {}", m),
        }
    }
}

#[derive(Debug)]
pub enum XmlConnError {
    /// A second send or recv was attempted while one was already outstanding.
    Pending,
    NotOpen,
    IsOpen,
    IsClosed,
    /// The peer closed the stream.
    Closed,
    ParseError(String),
    InvalidStreamStart(String),
    Io(io::Error),
}

impl fmt::Display for XmlConnError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            XmlConnError::Pending => write!(f, "a send or recv is already outstanding"),
            XmlConnError::NotOpen => write!(f, "stream has not been opened yet"),
            XmlConnError::IsOpen => write!(f, "stream is already open"),
            XmlConnError::IsClosed => write!(f, "stream is closed"),
            XmlConnError::Closed => write!(f, "peer closed the stream"),
            XmlConnError::ParseError(m) => write!(f, "XML parse error: {}", m),
            XmlConnError::InvalidStreamStart(m) => write!(f, "invalid stream start: {}", m),
            XmlConnError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl From<io::Error> for XmlConnError {
    fn from(e: io::Error) -> Self {
        XmlConnError::Io(e)
    }
}

impl From<stanza::xml::Error> for XmlConnError {
    fn from(e: stanza::xml::Error) -> Self {
        XmlConnError::ParseError(e.to_string())
    }
}

#[derive(Debug)]
pub enum TlsCertError {
    Invalid,
    NameMismatch,
    Revoked,
    SignerUnknown,
    SignerUnauthorised,
    Insecure,
    NotActive,
    Expired,
    NoCertificate,
    MaybeDos,
    Internal(String),
    Unknown(String),
}

impl fmt::Display for TlsCertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
pub enum AuthError {
    InitFailed(String),
    NotSupported(String),
    NoSupportedMechanisms,
    Network(String),
    InvalidReply(String),
    NoCredentials,
    Failure(String),
    ConnReset,
    Stream(String),
    ResourceConflict,
    NotAuthorized,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<sasl::Error> for AuthError {
    fn from(e: sasl::Error) -> Self {
        match e {
            sasl::Error::InitFailed(m) => AuthError::InitFailed(m),
            sasl::Error::NotSupported(m) => AuthError::NotSupported(m.to_owned()),
            sasl::Error::NoSupportedMechanisms => AuthError::NoSupportedMechanisms,
            sasl::Error::InvalidReply(m) => AuthError::InvalidReply(m),
            sasl::Error::NoCredentials => AuthError::NoCredentials,
            sasl::Error::Failure(m) => AuthError::Failure(m),
            sasl::Error::NotAuthorized => AuthError::NotAuthorized,
        }
    }
}

#[derive(Debug)]
pub enum ConnectorError {
    Resolver(ResolverError),
    Transport(io::Error),
    Xml(XmlConnError),
    TlsCert(TlsCertError),
    TlsUnavailable,
    Auth(AuthError),
    BindFailed(String),
    SessionFailed(String),
    Cancelled,
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectorError::Resolver(e) => write!(f, "resolver error: {}", e),
            ConnectorError::Transport(e) => write!(f, "transport error: {}", e),
            ConnectorError::Xml(e) => write!(f, "XML connection error: {}", e),
            ConnectorError::TlsCert(e) => write!(f, "TLS certificate error: {}", e),
            ConnectorError::TlsUnavailable => write!(f, "server does not support TLS"),
            ConnectorError::Auth(e) => write!(f, "authentication error: {}", e),
            ConnectorError::BindFailed(m) => write!(f, "resource binding failed: {}", m),
            ConnectorError::SessionFailed(m) => write!(f, "session establishment failed: {}", m),
            ConnectorError::Cancelled => write!(f, "connection attempt cancelled"),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<ResolverError> for ConnectorError {
    fn from(e: ResolverError) -> Self {
        ConnectorError::Resolver(e)
    }
}

impl From<io::Error> for ConnectorError {
    fn from(e: io::Error) -> Self {
        ConnectorError::Transport(e)
    }
}

impl From<XmlConnError> for ConnectorError {
    fn from(e: XmlConnError) -> Self {
        ConnectorError::Xml(e)
    }
}

impl From<AuthError> for ConnectorError {
    fn from(e: AuthError) -> Self {
        ConnectorError::Auth(e)
    }
}

impl From<sasl::Error> for ConnectorError {
    fn from(e: sasl::Error) -> Self {
        ConnectorError::Auth(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PorterError {
    AlreadyStarted,
    NotStarted,
    Closing,
    Closed,
    ForceClosing,
    NotIq,
}

impl fmt::Display for PorterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for PorterError {}
