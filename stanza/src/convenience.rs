//! Convenience builders: `iq_result`, `iq_error`, and XEP-0086 stanza error
//! encoding.

use crate::element::Element;
use crate::ns;
use crate::stanza::Stanza;

/// The `type=` axis of an XMPP stanza error, per RFC 6120 §8.3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Auth,
    Cancel,
    Modify,
    Wait,
    Continue,
}

impl ErrorType {
    fn as_str(self) -> &'static str {
        match self {
            ErrorType::Auth => "auth",
            ErrorType::Cancel => "cancel",
            ErrorType::Modify => "modify",
            ErrorType::Wait => "wait",
            ErrorType::Continue => "continue",
        }
    }
}

/// The defined stanza error conditions of RFC 6120 §8.3.3, plus the legacy
/// numeric code each maps to per XEP-0086.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    BadRequest,
    Conflict,
    FeatureNotImplemented,
    Forbidden,
    Gone,
    InternalServerError,
    ItemNotFound,
    JidMalformed,
    NotAcceptable,
    NotAllowed,
    NotAuthorized,
    PolicyViolation,
    RecipientUnavailable,
    Redirect,
    RegistrationRequired,
    RemoteServerNotFound,
    RemoteServerTimeout,
    ResourceConstraint,
    ServiceUnavailable,
    SubscriptionRequired,
    UndefinedCondition,
    UnexpectedRequest,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::BadRequest => "bad-request",
            Condition::Conflict => "conflict",
            Condition::FeatureNotImplemented => "feature-not-implemented",
            Condition::Forbidden => "forbidden",
            Condition::Gone => "gone",
            Condition::InternalServerError => "internal-server-error",
            Condition::ItemNotFound => "item-not-found",
            Condition::JidMalformed => "jid-malformed",
            Condition::NotAcceptable => "not-acceptable",
            Condition::NotAllowed => "not-allowed",
            Condition::NotAuthorized => "not-authorized",
            Condition::PolicyViolation => "policy-violation",
            Condition::RecipientUnavailable => "recipient-unavailable",
            Condition::Redirect => "redirect",
            Condition::RegistrationRequired => "registration-required",
            Condition::RemoteServerNotFound => "remote-server-not-found",
            Condition::RemoteServerTimeout => "remote-server-timeout",
            Condition::ResourceConstraint => "resource-constraint",
            Condition::ServiceUnavailable => "service-unavailable",
            Condition::SubscriptionRequired => "subscription-required",
            Condition::UndefinedCondition => "undefined-condition",
            Condition::UnexpectedRequest => "unexpected-request",
        }
    }

    /// The legacy numeric `code` attribute XEP-0086 maps this condition to.
    pub fn legacy_code(self) -> u16 {
        match self {
            Condition::BadRequest => 400,
            Condition::Conflict => 409,
            Condition::FeatureNotImplemented => 501,
            Condition::Forbidden => 403,
            Condition::Gone => 302,
            Condition::InternalServerError => 500,
            Condition::ItemNotFound => 404,
            Condition::JidMalformed => 400,
            Condition::NotAcceptable => 406,
            Condition::NotAllowed => 405,
            Condition::NotAuthorized => 401,
            Condition::PolicyViolation => 405,
            Condition::RecipientUnavailable => 404,
            Condition::Redirect => 302,
            Condition::RegistrationRequired => 407,
            Condition::RemoteServerNotFound => 404,
            Condition::RemoteServerTimeout => 504,
            Condition::ResourceConstraint => 500,
            Condition::ServiceUnavailable => 503,
            Condition::SubscriptionRequired => 407,
            Condition::UndefinedCondition => 500,
            Condition::UnexpectedRequest => 400,
        }
    }
}

/// A fully-specified XMPP stanza error: type, condition, an optional
/// specialised child in its own namespace, and an optional human-readable
/// message.
pub struct StanzaError {
    pub type_: ErrorType,
    pub condition: Condition,
    pub specialized: Option<Element>,
    pub text: Option<String>,
}

impl StanzaError {
    pub fn new(type_: ErrorType, condition: Condition) -> Self {
        StanzaError {
            type_,
            condition,
            specialized: None,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_specialized(mut self, specialized: Element) -> Self {
        self.specialized = Some(specialized);
        self
    }
}

/// Appends an `<error/>` child to `node` encoding `err` per XEP-0086: a type
/// attribute, a legacy numeric `code`, a `<CONDITION/>` in the stanzas
/// namespace, an optional specialised child, and an optional `<text/>`.
pub fn stanza_error_to_node(err: &StanzaError, node: &mut Element) {
    let mut error_el = Element::new("error", node.ns().to_owned());
    error_el.set_attr("type", err.type_.as_str());
    error_el.set_attr("code", err.condition.legacy_code().to_string());
    error_el.append_child(Element::new(err.condition.as_str(), ns::STANZAS));
    if let Some(specialized) = &err.specialized {
        error_el.append_child(specialized.clone());
    }
    if let Some(text) = &err.text {
        let mut text_el = Element::new("text", ns::STANZAS);
        text_el.set_text(text.clone());
        error_el.append_child(text_el);
    }
    node.append_child(error_el);
}

/// Builds the `iq type='result'` reply to `request`: copies `id`, swaps
/// `from`/`to`, and appends `extra_children` verbatim.
pub fn iq_result(request: &Stanza, extra_children: impl IntoIterator<Item = Element>) -> Stanza {
    let mut reply = Element::new("iq", request.element().ns().to_owned());
    if let Some(id) = request.id() {
        reply.set_attr("id", id.to_owned());
    }
    if let Some(from) = request.to() {
        reply.set_attr("from", from.to_owned());
    }
    if let Some(to) = request.from() {
        reply.set_attr("to", to.to_owned());
    }
    reply.set_attr("type", "result");
    for child in extra_children {
        reply.append_child(child);
    }
    Stanza::wrap(reply)
}

/// Builds the `iq type='error'` reply to `request`: same address swap as
/// [`iq_result`], with an `error` sub-kind, plus `extra_children` (typically
/// the original request's payload echoed back, followed by an `<error/>`
/// built with [`stanza_error_to_node`]).
pub fn iq_error(request: &Stanza, extra_children: impl IntoIterator<Item = Element>) -> Stanza {
    let mut reply = Element::new("iq", request.element().ns().to_owned());
    if let Some(id) = request.id() {
        reply.set_attr("id", id.to_owned());
    }
    if let Some(from) = request.to() {
        reply.set_attr("from", from.to_owned());
    }
    if let Some(to) = request.from() {
        reply.set_attr("to", to.to_owned());
    }
    reply.set_attr("type", "error");
    for child in extra_children {
        reply.append_child(child);
    }
    Stanza::wrap(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::SubKind;

    fn iq_get(id: &str, to: &str) -> Stanza {
        let el = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "get")
            .attr("id", id)
            .attr("to", to)
            .build()
            .into_element();
        Stanza::wrap(el)
    }

    #[test]
    fn iq_result_copies_id_and_swaps_addresses() {
        let request = iq_get("abc", "romeo@example.net");
        let result = iq_result(&request, []);
        assert_eq!(result.id(), Some("abc"));
        assert_eq!(result.from(), Some("romeo@example.net"));
        assert_eq!(result.sub_kind(), SubKind::Result_);
    }

    #[test]
    fn iq_error_appends_stanza_error_child() {
        let request = iq_get("1", "romeo@example.net");
        let mut error_stanza = iq_error(&request, []);
        let error = StanzaError::new(ErrorType::Cancel, Condition::ItemNotFound);
        stanza_error_to_node(&error, error_stanza.element_mut());
        let error_el = error_stanza
            .element()
            .get_child("error", ns::JABBER_CLIENT)
            .unwrap();
        assert_eq!(error_el.attr("type"), Some("cancel"));
        assert_eq!(error_el.attr("code"), Some("404"));
        assert!(error_el.get_child("item-not-found", ns::STANZAS).is_some());
    }
}
