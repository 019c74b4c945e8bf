//! Framed XML stream, connector, and stanza multiplexer for an XMPP
//! (RFC 6120 / RFC 6121) client core, built on [tokio](https://tokio.rs/).
//!
//! # Getting started
//!
//! Call [`connect`] with a bare JID, credentials, and [`ConnectOptions`] to
//! obtain a negotiated, authenticated, bound [`Connected`] stream. Hand its
//! `stream` field to [`Porter::new`] and call [`Porter::start`] to get a
//! running stanza multiplexer you can send through and register handlers on.
//!
//! This crate covers the session-establishment and stanza-routing core; it
//! does not provide roster, presence, or MUC abstractions on top.

#![deny(unsafe_code)]

pub mod connect;
pub mod connector;
/// Error types for every component in this crate.
pub mod error;
pub mod porter;
pub mod resolve;
pub mod stream;
pub mod tls;
pub mod xmlstream;

pub use connector::{connect, ConnectOptions, Connected, StreamManagementHandle};
pub use porter::{FromMatch, HandlerHandle, MatchTemplate, Porter};
pub use stream::MaybeTlsStream;
pub use xmlstream::{ReadPort, StreamHeader, WritePort, XmlStream};

pub use error::{
    AuthError, ConnectorError, PorterError, ResolverError, TlsCertError, XmlConnError,
};

#[cfg(test)]
mod tests {
    #[test]
    fn reexports() {
        #[allow(unused_imports)]
        use crate::{connect, ConnectOptions, Connected, FromMatch, HandlerHandle, Porter};
    }
}
