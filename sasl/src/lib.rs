//! SASL client mechanisms and mechanism selection for XMPP authentication.
//!
//! Mirrors the shape of the XMPP stream negotiation in RFC 6120 §6: the
//! client advertises nothing, the server lists its mechanisms in
//! `<stream:features>`, and the client picks one via [`Registry::select`]
//! and drives it through [`AuthMechanism`].

pub mod legacy;
pub mod mechanisms;

use std::fmt;

/// Failure modes specific to the authentication handshake. Transport-level
/// failures (network resets, stream errors) are the caller's concern; this
/// crate only reports what went wrong *inside* the SASL exchange.
#[derive(Debug)]
pub enum Error {
    /// A mechanism could not be initialised (e.g. missing randomness source).
    InitFailed(String),
    /// The registered mechanism is not one the caller is willing to use here.
    NotSupported(&'static str),
    /// No mechanism survived the intersection-and-filter in [`Registry::select`].
    NoSupportedMechanisms,
    /// A server message could not be parsed into the shape the mechanism
    /// expected at that step.
    InvalidReply(String),
    /// No credentials were supplied for a mechanism that requires them.
    NoCredentials,
    /// The server reported `<failure>` with the given defined-condition.
    Failure(String),
    /// The server's own proof (SCRAM `v=`, DIGEST-MD5 `rspauth`) did not
    /// match what the client computed.
    NotAuthorized,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InitFailed(msg) => write!(f, "failed to initialise mechanism: {}", msg),
            Error::NotSupported(name) => write!(f, "mechanism not supported here: {}", name),
            Error::NoSupportedMechanisms => {
                write!(f, "no mutually supported SASL mechanism")
            }
            Error::InvalidReply(msg) => write!(f, "invalid server reply: {}", msg),
            Error::NoCredentials => write!(f, "no credentials supplied"),
            Error::Failure(cond) => write!(f, "server reported failure: {}", cond),
            Error::NotAuthorized => write!(f, "server proof verification failed"),
        }
    }
}

impl std::error::Error for Error {}

/// Username/password (plus optional TLS channel-binding data) presented to
/// whichever mechanism the registry picks.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub channel_binding: Option<Vec<u8>>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
            channel_binding: None,
        }
    }

    pub fn with_channel_binding(mut self, binding: Vec<u8>) -> Self {
        self.channel_binding = Some(binding);
        self
    }
}

/// One side of a SASL exchange, driven by the porter's auth flow.
pub trait AuthMechanism {
    /// The IANA mechanism name, as advertised in `<mechanism/>`.
    fn name(&self) -> &'static str;

    /// Whether secrets cross the wire unencrypted, requiring TLS first.
    fn is_plain(&self) -> bool {
        false
    }

    /// The initial response sent alongside `<auth mechanism='...'>`.
    fn initial_response(&mut self) -> Result<Vec<u8>, Error>;

    /// Computes the response to a `<challenge>`.
    fn handle_challenge(&mut self, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Verifies any final data the server attached to `<success>`.
    fn handle_success(&mut self, _data: &[u8]) -> Result<(), Error> {
        Ok(())
    }
}

type Factory = Box<dyn Fn(&Credentials) -> Result<Box<dyn AuthMechanism + Send>, Error> + Send + Sync>;

struct Entry {
    name: &'static str,
    plain: bool,
    make: Factory,
}

/// Preference order used to break ties when more than one mutually
/// supported mechanism remains: SCRAM-SHA-1 first, then DIGEST-MD5, then
/// PLAIN, then anything else registered, in registration order.
fn preference_rank(name: &str) -> u8 {
    match name {
        "SCRAM-SHA-1" => 0,
        "DIGEST-MD5" => 1,
        "PLAIN" => 2,
        _ => 3,
    }
}

/// The set of mechanisms a client is willing to use, in the order they were
/// registered (registration order only matters as a final tie-break; see
/// [`preference_rank`]).
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { entries: Vec::new() }
    }

    /// Registers a mechanism factory under `name`. `plain` marks it as one
    /// that must be excluded from an unencrypted channel unless the caller
    /// opts in.
    pub fn register(
        &mut self,
        name: &'static str,
        plain: bool,
        make: impl Fn(&Credentials) -> Result<Box<dyn AuthMechanism + Send>, Error> + Send + Sync + 'static,
    ) {
        self.entries.push(Entry {
            name,
            plain,
            make: Box::new(make),
        });
    }

    /// A registry pre-populated with SCRAM-SHA-1, DIGEST-MD5, and PLAIN
    /// (whichever are compiled in via their feature flags).
    pub fn with_defaults() -> Self {
        let mut reg = Registry::new();
        #[cfg(feature = "scram")]
        reg.register("SCRAM-SHA-1", false, |creds| {
            mechanisms::scram_sha1::ScramSha1::new(creds).map(|m| Box::new(m) as Box<dyn AuthMechanism + Send>)
        });
        #[cfg(feature = "digest-md5")]
        reg.register("DIGEST-MD5", false, |creds| {
            mechanisms::digest_md5::DigestMd5::new(creds).map(|m| Box::new(m) as Box<dyn AuthMechanism + Send>)
        });
        reg.register("PLAIN", true, |creds| {
            mechanisms::plain::Plain::new(creds).map(|m| Box::new(m) as Box<dyn AuthMechanism + Send>)
        });
        reg
    }

    /// Implements the registry policy of the authentication component:
    /// intersect with `server_mechanisms`, drop plain mechanisms unless
    /// `allow_plaintext` is set (the caller should only set this when the
    /// channel is already encrypted), order by [`preference_rank`], and
    /// instantiate the first one with `creds`.
    pub fn select(
        &self,
        server_mechanisms: &[String],
        allow_plaintext: bool,
        creds: &Credentials,
    ) -> Result<Box<dyn AuthMechanism + Send>, Error> {
        let mut candidates: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| server_mechanisms.iter().any(|m| m == e.name))
            .filter(|e| !e.plain || allow_plaintext)
            .collect();
        candidates.sort_by_key(|e| preference_rank(e.name));
        let chosen = candidates
            .into_iter()
            .next()
            .ok_or(Error::NoSupportedMechanisms)?;
        (chosen.make)(creds)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_highest_preference_mechanism() {
        let reg = Registry::with_defaults();
        let creds = Credentials::new("romeo", "password");
        let servers = vec![
            "PLAIN".to_owned(),
            "DIGEST-MD5".to_owned(),
            "SCRAM-SHA-1".to_owned(),
        ];
        let mech = reg.select(&servers, true, &creds).unwrap();
        assert_eq!(mech.name(), "SCRAM-SHA-1");
    }

    #[test]
    fn drops_plain_on_unencrypted_channel() {
        let reg = Registry::with_defaults();
        let creds = Credentials::new("romeo", "password");
        let servers = vec!["PLAIN".to_owned()];
        let err = reg.select(&servers, false, &creds).unwrap_err();
        assert!(matches!(err, Error::NoSupportedMechanisms));
    }

    #[test]
    fn empty_intersection_fails() {
        let reg = Registry::with_defaults();
        let creds = Credentials::new("romeo", "password");
        let servers = vec!["GSSAPI".to_owned()];
        let err = reg.select(&servers, true, &creds).unwrap_err();
        assert!(matches!(err, Error::NoSupportedMechanisms));
    }
}
