// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A `Jid` type for XMPP addresses (`[node@]domain[/resource]`).
//!
//! Parsing follows RFC 6122's three-part grammar, not as a generic
//! string-splitting exercise: the node and resource parts are additionally
//! passed through the `stringprep` profiles so that two syntactically
//! different strings which denote the same identifier (case folding,
//! compatibility decomposition, …) compare equal once parsed.

use std::fmt;
use std::str::FromStr;

/// Failure to parse a string as a [`Jid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input string was empty.
    Empty,
    /// The domain part was empty (`@domain` with nothing after `@`, or the
    /// whole string was just `@something`/`something@`).
    EmptyDomain,
    /// A `@` was present but the node part in front of it was empty.
    EmptyNode,
    /// A `/` was present but the resource part after it was empty.
    EmptyResource,
    /// More than one `@` was found before the resource separator.
    TooManyAt,
    /// The node, domain, or resource part failed `stringprep` normalisation.
    StringPrep,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Empty => write!(f, "JID string is empty"),
            Error::EmptyDomain => write!(f, "JID domain part is empty"),
            Error::EmptyNode => write!(f, "JID node part is empty"),
            Error::EmptyResource => write!(f, "JID resource part is empty"),
            Error::TooManyAt => write!(f, "JID contains more than one '@'"),
            Error::StringPrep => write!(f, "JID part failed stringprep normalisation"),
        }
    }
}

impl std::error::Error for Error {}

/// A bare JID: `[node@]domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BareJid {
    node: Option<String>,
    domain: String,
}

/// A full JID: `[node@]domain/resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullJid {
    node: Option<String>,
    domain: String,
    resource: String,
}

/// Either a bare or a full JID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Jid {
    /// `[node@]domain`
    Bare(BareJid),
    /// `[node@]domain/resource`
    Full(FullJid),
}

fn prep_node(raw: &str) -> Result<String, Error> {
    stringprep::nodeprep(raw).map(|c| c.into_owned()).map_err(|_| Error::StringPrep)
}

fn prep_domain(raw: &str) -> Result<String, Error> {
    stringprep::nameprep(raw).map(|c| c.into_owned()).map_err(|_| Error::StringPrep)
}

fn prep_resource(raw: &str) -> Result<String, Error> {
    stringprep::resourceprep(raw).map(|c| c.into_owned()).map_err(|_| Error::StringPrep)
}

/// Split `s` into `(local, resource)` on the first unescaped `/`, per
/// RFC 6122's grammar (only one resource separator is meaningful: the
/// first `/` terminates the domain/node part).
fn split_resource(s: &str) -> (&str, Option<&str>) {
    match memchr::memchr(b'/', s.as_bytes()) {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    }
}

fn parse_parts(s: &str) -> Result<(Option<String>, String, Option<String>), Error> {
    if s.is_empty() {
        return Err(Error::Empty);
    }
    let (local, resource) = split_resource(s);
    let resource = match resource {
        Some(r) if r.is_empty() => return Err(Error::EmptyResource),
        Some(r) => Some(prep_resource(r)?),
        None => None,
    };

    let at_count = local.bytes().filter(|&b| b == b'@').count();
    if at_count > 1 {
        return Err(Error::TooManyAt);
    }

    let (node, domain) = if at_count == 1 {
        let idx = memchr::memchr(b'@', local.as_bytes()).unwrap();
        let node_part = &local[..idx];
        let domain_part = &local[idx + 1..];
        if node_part.is_empty() {
            return Err(Error::EmptyNode);
        }
        if domain_part.is_empty() {
            return Err(Error::EmptyDomain);
        }
        (Some(prep_node(node_part)?), prep_domain(domain_part)?)
    } else {
        if local.is_empty() {
            return Err(Error::EmptyDomain);
        }
        (None, prep_domain(local)?)
    };

    Ok((node, domain, resource))
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (node, domain, resource) = parse_parts(s)?;
        Ok(match resource {
            Some(resource) => Jid::Full(FullJid { node, domain, resource }),
            None => Jid::Bare(BareJid { node, domain }),
        })
    }
}

impl FromStr for BareJid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Jid>()? {
            Jid::Bare(b) => Ok(b),
            Jid::Full(f) => Ok(f.to_bare()),
        }
    }
}

impl FromStr for FullJid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<Jid>()? {
            Jid::Full(f) => Ok(f),
            Jid::Bare(_) => Err(Error::EmptyResource),
        }
    }
}

impl BareJid {
    /// Construct a bare JID directly from parts, without going through
    /// `stringprep` (the parts are assumed already normalised).
    pub fn new(node: Option<String>, domain: String) -> Self {
        BareJid { node, domain }
    }

    /// The node (local) part, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Build the full JID obtained by appending `resource`.
    pub fn with_resource(&self, resource: &str) -> Result<FullJid, Error> {
        if resource.is_empty() {
            return Err(Error::EmptyResource);
        }
        Ok(FullJid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: prep_resource(resource)?,
        })
    }
}

impl FullJid {
    /// The node (local) part, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource part.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The bare JID obtained by dropping the resource.
    pub fn to_bare(&self) -> BareJid {
        BareJid {
            node: self.node.clone(),
            domain: self.domain.clone(),
        }
    }
}

impl Jid {
    /// The node (local) part, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Jid::Bare(b) => b.node(),
            Jid::Full(f) => f.node(),
        }
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        match self {
            Jid::Bare(b) => b.domain(),
            Jid::Full(f) => f.domain(),
        }
    }

    /// The resource part, if this is a full JID.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Jid::Bare(_) => None,
            Jid::Full(f) => Some(f.resource()),
        }
    }

    /// The bare JID obtained by dropping any resource.
    pub fn to_bare(&self) -> BareJid {
        match self {
            Jid::Bare(b) => b.clone(),
            Jid::Full(f) => f.to_bare(),
        }
    }

    /// True if this JID carries a resource.
    pub fn is_full(&self) -> bool {
        matches!(self, Jid::Full(_))
    }

    /// True if two JIDs share the same bare JID (node and domain), ignoring
    /// resource. Used for §4.4.2 "from matching" against a bare-JID filter.
    pub fn same_bare(&self, other: &Jid) -> bool {
        self.node() == other.node() && self.domain() == other.domain()
    }
}

impl From<BareJid> for Jid {
    fn from(b: BareJid) -> Self {
        Jid::Bare(b)
    }
}

impl From<FullJid> for Jid {
    fn from(f: FullJid) -> Self {
        Jid::Full(f)
    }
}

impl fmt::Display for BareJid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}@{}", node, self.domain),
            None => write!(f, "{}", self.domain),
        }
    }
}

impl fmt::Display for FullJid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}@{}/{}", node, self.domain, self.resource),
            None => write!(f, "{}/{}", self.domain, self.resource),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Jid::Bare(b) => b.fmt(f),
            Jid::Full(full) => full.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare() {
        let jid: Jid = "romeo@example.net".parse().unwrap();
        assert_eq!(jid.node(), Some("romeo"));
        assert_eq!(jid.domain(), "example.net");
        assert_eq!(jid.resource(), None);
    }

    #[test]
    fn parses_full() {
        let jid: Jid = "romeo@example.net/orchard".parse().unwrap();
        assert_eq!(jid.node(), Some("romeo"));
        assert_eq!(jid.resource(), Some("orchard"));
        assert!(jid.is_full());
    }

    #[test]
    fn parses_domain_only() {
        let jid: Jid = "example.net".parse().unwrap();
        assert_eq!(jid.node(), None);
        assert_eq!(jid.domain(), "example.net");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!("".parse::<Jid>().unwrap_err(), Error::Empty);
    }

    #[test]
    fn rejects_empty_node() {
        assert_eq!("@example.net".parse::<Jid>().unwrap_err(), Error::EmptyNode);
    }

    #[test]
    fn rejects_empty_domain() {
        assert_eq!("romeo@".parse::<Jid>().unwrap_err(), Error::EmptyDomain);
        assert_eq!("@".parse::<Jid>().unwrap_err(), Error::EmptyNode);
    }

    #[test]
    fn rejects_empty_resource() {
        assert_eq!(
            "romeo@example.net/".parse::<Jid>().unwrap_err(),
            Error::EmptyResource
        );
    }

    #[test]
    fn rejects_two_at() {
        assert_eq!(
            "ro@meo@example.net".parse::<Jid>().unwrap_err(),
            Error::TooManyAt
        );
    }

    #[test]
    fn round_trips_through_display() {
        for s in ["romeo@example.net", "romeo@example.net/orchard", "example.net"] {
            let jid: Jid = s.parse().unwrap();
            let reparsed: Jid = jid.to_string().parse().unwrap();
            assert_eq!(jid, reparsed);
        }
    }

    #[test]
    fn same_bare_ignores_resource() {
        let a: Jid = "romeo@example.net/orchard".parse().unwrap();
        let b: Jid = "romeo@example.net/balcony".parse().unwrap();
        assert!(a.same_bare(&b));
        let c: Jid = "juliet@example.net".parse().unwrap();
        assert!(!a.same_bare(&c));
    }
}
