//! Well-known XMPP namespace URIs and the process-wide prefix registry used
//! when serialising namespaced attributes.

use std::collections::HashMap;
use std::sync::RwLock;

pub const JABBER_CLIENT: &str = "jabber:client";
pub const STREAM: &str = "http://etherx.jabber.org/streams";
pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const DATA_FORMS: &str = "jabber:x:data";
pub const CAPS: &str = "http://jabber.org/protocol/caps";
pub const JABBER_IQ_AUTH: &str = "jabber:iq:auth";
pub const SM: &str = "urn:xmpp:sm:3";
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
pub const STARTTLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
pub const IQ_AUTH_FEATURE: &str = "http://jabber.org/features/iq-auth";

fn default_prefixes() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert(STREAM.to_owned(), "stream".to_owned());
    m.insert(XML.to_owned(), "xml".to_owned());
    m
}

static PREFIX_REGISTRY: RwLock<Option<HashMap<String, String>>> = RwLock::new(None);

/// Looks up (or lazily initialises) the prefix registered for `uri`, if any.
///
/// The registry is a process-wide map, seeded with `stream:` and `xml:` and
/// extensible at any point before serialisation via [`set_prefix`]. Per the
/// one-shot-init contract, calling `set_prefix` concurrently with an
/// in-flight writer has undefined effect on that writer.
pub fn prefix_for(uri: &str) -> Option<String> {
    {
        let guard = PREFIX_REGISTRY.read().unwrap();
        if let Some(map) = guard.as_ref() {
            return map.get(uri).cloned();
        }
    }
    let mut guard = PREFIX_REGISTRY.write().unwrap();
    if guard.is_none() {
        *guard = Some(default_prefixes());
    }
    guard.as_ref().unwrap().get(uri).cloned()
}

/// Registers a stable prefix for `uri`, to be used when emitting namespaced
/// attributes. Safe to call before any serialisation has started; undefined
/// effect on writers already mid-stream.
pub fn set_prefix(uri: impl Into<String>, prefix: impl Into<String>) {
    let mut guard = PREFIX_REGISTRY.write().unwrap();
    let map = guard.get_or_insert_with(default_prefixes);
    map.insert(uri.into(), prefix.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_prefix_is_seeded() {
        assert_eq!(prefix_for(XML).as_deref(), Some("xml"));
    }

    #[test]
    fn set_prefix_is_visible_afterwards() {
        set_prefix("urn:test:ns-registry", "t");
        assert_eq!(prefix_for("urn:test:ns-registry").as_deref(), Some("t"));
    }
}
