//! Legacy `jabber:iq:auth` authentication (XEP-0078, pre-SASL), offered by
//! old servers that still advertise `<iq type='get'><query xmlns='jabber:iq:auth'/></iq>`
//! as their only mechanism.

use sha1::{Digest, Sha1};
use stanza::{ns, Element};

use crate::Error;

/// Builds the initial discovery request: `<iq type='get'><query><username/></query></iq>`.
pub fn discovery_request(id: &str, username: &str) -> Element {
    let mut username_el = Element::new("username", ns::JABBER_IQ_AUTH);
    username_el.set_text(username.to_owned());
    let mut query = Element::new("query", ns::JABBER_IQ_AUTH);
    query.append_child(username_el);
    let mut iq = Element::new("iq", ns::JABBER_CLIENT);
    iq.set_attr("type", "get");
    iq.set_attr("id", id);
    iq.append_child(query);
    iq
}

/// Which child fields the server's discovery reply asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferedFields {
    pub plaintext_password: bool,
    pub digest: bool,
    pub resource: bool,
}

/// Reads the `<query/>` of a discovery reply to see which fields the server
/// wants in the follow-up `iq-set`.
pub fn parse_discovery_reply(query: &Element) -> OfferedFields {
    OfferedFields {
        plaintext_password: query.get_child("password", ns::JABBER_IQ_AUTH).is_some(),
        digest: query.get_child("digest", ns::JABBER_IQ_AUTH).is_some(),
        resource: query.get_child("resource", ns::JABBER_IQ_AUTH).is_some(),
    }
}

/// `SHA1(stream_id || password)`, hex-encoded, for the `<digest/>` child.
fn digest_secret(stream_id: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(password.as_bytes());
    let out: [u8; 20] = hasher.finalize().into();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Builds the `iq-set` carrying username, resource, and a digest secret
/// derived from the stream id. Only usable when the discovery reply offered
/// a `<digest/>` field.
pub fn digest_login_request(
    id: &str,
    username: &str,
    resource: &str,
    stream_id: &str,
    password: &str,
) -> Element {
    build_login_request(id, username, resource, |query| {
        let mut digest_el = Element::new("digest", ns::JABBER_IQ_AUTH);
        digest_el.set_text(digest_secret(stream_id, password));
        query.append_child(digest_el);
    })
}

/// Builds the `iq-set` carrying username, resource, and the password in
/// clear. Callers must apply the same plaintext-over-TLS-only policy as
/// SASL PLAIN before calling this.
pub fn plaintext_login_request(id: &str, username: &str, resource: &str, password: &str) -> Element {
    build_login_request(id, username, resource, |query| {
        let mut password_el = Element::new("password", ns::JABBER_IQ_AUTH);
        password_el.set_text(password.to_owned());
        query.append_child(password_el);
    })
}

fn build_login_request(
    id: &str,
    username: &str,
    resource: &str,
    append_secret: impl FnOnce(&mut Element),
) -> Element {
    let mut username_el = Element::new("username", ns::JABBER_IQ_AUTH);
    username_el.set_text(username.to_owned());
    let mut resource_el = Element::new("resource", ns::JABBER_IQ_AUTH);
    resource_el.set_text(resource.to_owned());

    let mut query = Element::new("query", ns::JABBER_IQ_AUTH);
    query.append_child(username_el);
    append_secret(&mut query);
    query.append_child(resource_el);

    let mut iq = Element::new("iq", ns::JABBER_CLIENT);
    iq.set_attr("type", "set");
    iq.set_attr("id", id);
    iq.append_child(query);
    iq
}

/// Interprets the reply to a login `iq-set`: `result` is success, anything
/// else is a failure carrying the stanza error condition if present.
pub fn interpret_login_reply(reply: &Element) -> Result<(), Error> {
    match reply.attr("type") {
        Some("result") => Ok(()),
        Some("error") => {
            let condition = reply
                .get_child("error", ns::JABBER_CLIENT)
                .and_then(|error_el| error_el.children().next())
                .map(|cond| cond.name().to_owned())
                .unwrap_or_else(|| "unknown".to_owned());
            Err(Error::Failure(condition))
        }
        other => Err(Error::InvalidReply(format!(
            "unexpected iq type in legacy auth reply: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_secret_is_sha1_of_stream_id_and_password() {
        let secret = digest_secret("3EF7B6A", "Calliope");
        assert_eq!(secret, "eebf7089fbba6b0bb5ac3036ea0c51665cda5c4e");
    }

    #[test]
    fn discovery_reply_reports_offered_fields() {
        let mut query = Element::new("query", ns::JABBER_IQ_AUTH);
        query.append_child(Element::new("digest", ns::JABBER_IQ_AUTH));
        query.append_child(Element::new("resource", ns::JABBER_IQ_AUTH));
        let offered = parse_discovery_reply(&query);
        assert!(offered.digest);
        assert!(offered.resource);
        assert!(!offered.plaintext_password);
    }

    #[test]
    fn interprets_result_and_error_replies() {
        let mut result = Element::new("iq", ns::JABBER_CLIENT);
        result.set_attr("type", "result");
        assert!(interpret_login_reply(&result).is_ok());

        let mut error_iq = Element::new("iq", ns::JABBER_CLIENT);
        error_iq.set_attr("type", "error");
        let mut error_el = Element::new("error", ns::JABBER_CLIENT);
        error_el.append_child(Element::new("not-authorized", ns::STANZAS));
        error_iq.append_child(error_el);
        let err = interpret_login_reply(&error_iq).unwrap_err();
        assert!(matches!(err, Error::Failure(cond) if cond == "not-authorized"));
    }
}
