//! Derived stanza properties (kind, sub-kind, addressing) layered over a
//! plain [`Element`].

use crate::element::Element;
use crate::ns;

/// The top-level kind of a stanza, derived from its element name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Message,
    Presence,
    Iq,
    Features,
    StreamError,
    Auth,
    Challenge,
    Response,
    Success,
    Failure,
    Other(String),
}

impl Kind {
    pub fn of(element: &Element) -> Kind {
        match element.name() {
            "message" => Kind::Message,
            "presence" => Kind::Presence,
            "iq" => Kind::Iq,
            "features" => Kind::Features,
            "error" => Kind::StreamError,
            "auth" => Kind::Auth,
            "challenge" => Kind::Challenge,
            "response" => Kind::Response,
            "success" => Kind::Success,
            "failure" => Kind::Failure,
            other => Kind::Other(other.to_owned()),
        }
    }
}

/// The sub-kind (`type=` attribute, with its per-kind default), derived from
/// the stanza's element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubKind {
    Get,
    Set,
    Result_,
    Error,
    Chat,
    Normal,
    Headline,
    Groupchat,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Unavailable,
    Available,
    Probe,
    /// No sub-kind applies (e.g. `<features/>`).
    None,
    Other(String),
}

impl SubKind {
    pub fn of(element: &Element) -> SubKind {
        let type_attr = element.attr("type");
        match Kind::of(element) {
            Kind::Iq => match type_attr {
                Some("get") => SubKind::Get,
                Some("set") => SubKind::Set,
                Some("result") => SubKind::Result_,
                Some("error") => SubKind::Error,
                Some(other) => SubKind::Other(other.to_owned()),
                None => SubKind::None,
            },
            Kind::Message => match type_attr {
                Some("chat") => SubKind::Chat,
                Some("groupchat") => SubKind::Groupchat,
                Some("headline") => SubKind::Headline,
                Some("error") => SubKind::Error,
                Some("normal") | None => SubKind::Normal,
                Some(other) => SubKind::Other(other.to_owned()),
            },
            Kind::Presence => match type_attr {
                None => SubKind::Available,
                Some("unavailable") => SubKind::Unavailable,
                Some("subscribe") => SubKind::Subscribe,
                Some("subscribed") => SubKind::Subscribed,
                Some("unsubscribe") => SubKind::Unsubscribe,
                Some("unsubscribed") => SubKind::Unsubscribed,
                Some("probe") => SubKind::Probe,
                Some("error") => SubKind::Error,
                Some(other) => SubKind::Other(other.to_owned()),
            },
            _ => SubKind::None,
        }
    }
}

/// A thin, read-mostly view over an [`Element`] exposing the derived
/// properties the porter and connector dispatch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza(Element);

impl Stanza {
    /// Wraps `element`, without checking that it is a recognised stanza
    /// name; unrecognised names simply yield `Kind::Other`.
    pub fn wrap(element: Element) -> Stanza {
        Stanza(element)
    }

    pub fn element(&self) -> &Element {
        &self.0
    }

    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.0
    }

    pub fn into_element(self) -> Element {
        self.0
    }

    pub fn kind(&self) -> Kind {
        Kind::of(&self.0)
    }

    pub fn sub_kind(&self) -> SubKind {
        SubKind::of(&self.0)
    }

    pub fn from(&self) -> Option<&str> {
        self.0.attr("from")
    }

    pub fn to(&self) -> Option<&str> {
        self.0.attr("to")
    }

    pub fn id(&self) -> Option<&str> {
        self.0.attr("id")
    }

    pub fn lang(&self) -> Option<&str> {
        self.0.attr_ns("lang", ns::XML)
    }

    pub fn set_from(&mut self, from: impl Into<String>) {
        self.0.set_attr("from", from);
    }

    pub fn set_to(&mut self, to: impl Into<String>) {
        self.0.set_attr("to", to);
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.set_attr("id", id);
    }

    pub fn is_iq_request(&self) -> bool {
        matches!(self.kind(), Kind::Iq)
            && matches!(self.sub_kind(), SubKind::Get | SubKind::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_sub_kind_for_iq_get() {
        let el = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "get")
            .attr("id", "1")
            .build()
            .into_element();
        let s = Stanza::wrap(el);
        assert_eq!(s.kind(), Kind::Iq);
        assert_eq!(s.sub_kind(), SubKind::Get);
        assert!(s.is_iq_request());
    }

    #[test]
    fn presence_without_type_is_available() {
        let el = Element::builder("presence", ns::JABBER_CLIENT)
            .build()
            .into_element();
        let s = Stanza::wrap(el);
        assert_eq!(s.sub_kind(), SubKind::Available);
    }

    #[test]
    fn message_without_type_is_normal() {
        let el = Element::builder("message", ns::JABBER_CLIENT)
            .build()
            .into_element();
        assert_eq!(Stanza::wrap(el).sub_kind(), SubKind::Normal);
    }
}
