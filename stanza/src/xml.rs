//! Conversion between [`Element`] and the `rxml` event/item streams: the
//! streaming reader used by the framed connection and a one-shot parser
//! used by tests and offline tooling.

use std::fmt;
use std::str::FromStr;

use rxml::{AttrMap, Namespace, NcName, QName};

use crate::element::Element;

#[derive(Debug)]
pub enum Error {
    Xml(rxml::Error),
    UnexpectedEvent(&'static str),
    UnexpectedEof,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Xml(e) => write!(f, "XML error: {}", e),
            Error::UnexpectedEvent(ctx) => write!(f, "unexpected XML event: {}", ctx),
            Error::UnexpectedEof => write!(f, "document ended before the root element closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<rxml::Error> for Error {
    fn from(e: rxml::Error) -> Self {
        Error::Xml(e)
    }
}

/// Streaming builder that turns `rxml::Event`s, fed one at a time, into an
/// [`Element`]. Used by the framed connection's reader, which receives
/// events from an `rxml::AsyncReader` one suspension point at a time.
pub struct ElementBuilder {
    inner: Option<Element>,
    nested: Option<Box<ElementBuilder>>,
}

impl ElementBuilder {
    /// Starts building the element whose `StartElement` event has already
    /// been consumed by the caller.
    pub fn new(qname: QName, attrs: AttrMap) -> Self {
        let (namespace, name) = qname;
        let mut element = Element::new(name.as_str().to_owned(), namespace.as_str().to_owned());
        for ((attr_ns, attr_name), value) in attrs.into_iter() {
            if attr_ns.is_empty() {
                element.set_attr(attr_name.as_str().to_owned(), value);
            } else {
                element.set_attr_ns(
                    attr_name.as_str().to_owned(),
                    attr_ns.as_str().to_owned(),
                    value,
                );
            }
        }
        ElementBuilder {
            inner: Some(element),
            nested: None,
        }
    }

    /// Feeds the next event. Returns `Some(element)` once the matching
    /// `EndElement` for the element this builder was started for has been
    /// consumed.
    pub fn feed(&mut self, ev: rxml::Event) -> Result<Option<Element>, Error> {
        if let Some(nested) = self.nested.as_mut() {
            if let Some(child) = nested.feed(ev)? {
                self.nested = None;
                self.inner
                    .as_mut()
                    .expect("feed() called after it finished")
                    .append_child(child);
                return Ok(None);
            }
            return Ok(None);
        }
        let inner = self
            .inner
            .as_mut()
            .expect("feed() called after it finished");
        match ev {
            rxml::Event::XmlDeclaration(_, _) => Ok(None),
            rxml::Event::StartElement(_, qname, attrs) => {
                self.nested = Some(Box::new(ElementBuilder::new(qname, attrs)));
                Ok(None)
            }
            rxml::Event::Text(_, text) => {
                inner.append_text_node(text);
                Ok(None)
            }
            rxml::Event::EndElement(_) => Ok(self.inner.take()),
        }
    }
}

/// Parses a complete, self-contained XML document (such as a test fixture
/// or a standalone stanza) into an [`Element`].
pub fn parse_str(s: &str) -> Result<Element, Error> {
    let mut buf = s.as_bytes();
    let mut reader = rxml::Reader::new(&mut buf);
    let (qname, attrs) = loop {
        match reader.next() {
            Some(Ok(rxml::Event::XmlDeclaration(_, _))) => continue,
            Some(Ok(rxml::Event::StartElement(_, qname, attrs))) => break (qname, attrs),
            Some(Ok(_)) => return Err(Error::UnexpectedEvent("expected start element")),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::UnexpectedEof),
        }
    };
    let mut builder = ElementBuilder::new(qname, attrs);
    for ev in reader {
        if let Some(element) = builder.feed(ev?)? {
            return Ok(element);
        }
    }
    Err(Error::UnexpectedEof)
}

impl FromStr for Element {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_str(s)
    }
}

/// Produces the `rxml::Item` sequence for `element`, suitable for feeding
/// to an `rxml::writer::Encoder`. Namespaced attributes are emitted using
/// whatever prefix the namespace-prefix registry assigns; the writer's own
/// namespace tracker (`SimpleNamespaces`) resolves and declares it.
pub fn write_items(element: &Element, sink: &mut Vec<rxml::Item<'static>>) {
    use std::borrow::Cow;

    let ns = Namespace::from(element.ns().to_owned());
    let name: NcName = NcName::try_from(element.name().to_owned())
        .expect("element local name must be a valid NCName");
    sink.push(rxml::Item::ElementHeadStart(ns, Cow::Owned(name)));
    for attr in element.attrs() {
        let attr_ns = match &attr.namespace {
            Some(ns) => Namespace::from(ns.clone()),
            None => Namespace::NONE,
        };
        let attr_name: NcName = NcName::try_from(attr.name.clone())
            .expect("attribute local name must be a valid NCName");
        sink.push(rxml::Item::Attribute(
            attr_ns,
            Cow::Owned(attr_name),
            Cow::Owned(attr.value.clone()),
        ));
    }
    sink.push(rxml::Item::ElementHeadEnd);
    for node in element.nodes() {
        match node {
            crate::element::Node::Text(text) => {
                sink.push(rxml::Item::Text(Cow::Owned(text.clone())));
            }
            crate::element::Node::Element(child) => write_items(child, sink),
        }
    }
    sink.push(rxml::Item::ElementFoot);
}

/// Serialises `element` to a standalone byte buffer (used by tests and by
/// anything that needs a one-shot rendering, e.g. logging).
pub fn to_vec(element: &Element) -> Result<Vec<u8>, Error> {
    let mut items = Vec::new();
    write_items(element, &mut items);
    let mut writer = rxml::writer::Encoder::new();
    let mut buf = Vec::new();
    for item in items {
        writer.encode(item, &mut buf)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_element() {
        let el = parse_str("<iq xmlns='jabber:client' type='get' id='1'/>").unwrap();
        assert_eq!(el.name(), "iq");
        assert_eq!(el.ns(), "jabber:client");
        assert_eq!(el.attr("type"), Some("get"));
    }

    #[test]
    fn parses_nested_elements_and_text() {
        let el = parse_str(
            "<message xmlns='jabber:client'><body>hello</body><delay xmlns='urn:x:delay'/></message>",
        )
        .unwrap();
        let body = el.get_child("body", "jabber:client").unwrap();
        assert_eq!(body.text(), "hello");
        assert!(el.get_child("delay", "urn:x:delay").is_some());
    }

    #[test]
    fn round_trips_through_serialisation() {
        let el = parse_str(
            "<iq xmlns='jabber:client' type='result' id='1' to='a@b'><ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .unwrap();
        let bytes = to_vec(&el).unwrap();
        let reparsed = parse_str(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(el, reparsed);
    }
}
