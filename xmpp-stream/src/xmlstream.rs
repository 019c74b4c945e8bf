//! The framed XML connection: ordered async send/recv of stream opens,
//! stanzas, and stream closes over a byte stream, per RFC 6120 §4.

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};

use stanza::xml::ElementBuilder;
use stanza::{ns, Element, Stanza};

use crate::error::XmlConnError as Error;

/// The attributes of a `<stream:stream>` open or close tag.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    pub to: Option<String>,
    pub from: Option<String>,
    pub version: Option<String>,
    pub lang: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ClosedNotOpen,
    OpenSent,
    OpenReceived,
    BothOpen,
    CloseSent,
    CloseReceived,
    Closed,
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Incremental XML reader/writer pair over a single `Io` transport,
/// enforcing the state machine from closed-not-open through both-open to
/// closed. At most one `send_*`/`recv_*` call can be in flight at a time
/// because each takes `&mut self`; the borrow checker rejects a second
/// concurrent call rather than this type tracking a runtime flag.
pub struct XmlStream<Io> {
    write_half: WriteHalf<Io>,
    encoder: rxml::writer::Encoder,
    reader: Option<rxml::AsyncReader<ReadHalf<Io>>>,
    state: State,
    element_builder: Option<ElementBuilder>,
}

impl<Io> XmlStream<Io>
where
    Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    pub fn new(io: Io) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        XmlStream {
            write_half,
            encoder: rxml::writer::Encoder::new(),
            reader: Some(rxml::AsyncReader::wrap(read_half, rxml::Parser::default())),
            state: State::ClosedNotOpen,
            element_builder: None,
        }
    }

    fn reader_mut(&mut self) -> &mut rxml::AsyncReader<ReadHalf<Io>> {
        self.reader
            .as_mut()
            .expect("xml stream reader missing outside of reset()")
    }

    /// Sends the opening `<stream:stream>` tag. Valid from `closed-not-open`
    /// (becoming `open-sent`) or after `recv_open` (`open-received`,
    /// becoming `both-open`).
    pub async fn send_open(&mut self, header: &StreamHeader) -> Result<(), Error> {
        match self.state {
            State::ClosedNotOpen | State::OpenReceived => {}
            _ => return Err(Error::IsOpen),
        }

        let mut s = String::new();
        s.push_str("<stream:stream xmlns='");
        s.push_str(ns::JABBER_CLIENT);
        s.push_str("' xmlns:stream='");
        s.push_str(ns::STREAM);
        s.push('\'');
        if let Some(to) = &header.to {
            s.push_str(" to='");
            s.push_str(&escape_attr(to));
            s.push('\'');
        }
        if let Some(from) = &header.from {
            s.push_str(" from='");
            s.push_str(&escape_attr(from));
            s.push('\'');
        }
        if let Some(version) = &header.version {
            s.push_str(" version='");
            s.push_str(&escape_attr(version));
            s.push('\'');
        }
        if let Some(lang) = &header.lang {
            s.push_str(" xml:lang='");
            s.push_str(&escape_attr(lang));
            s.push('\'');
        }
        if let Some(id) = &header.id {
            s.push_str(" id='");
            s.push_str(&escape_attr(id));
            s.push('\'');
        }
        s.push('>');

        self.write_half.write_all(s.as_bytes()).await?;
        self.write_half.flush().await?;
        self.state = match self.state {
            State::ClosedNotOpen => State::OpenSent,
            State::OpenReceived => State::BothOpen,
            _ => unreachable!(),
        };
        Ok(())
    }

    /// Receives the peer's opening `<stream:stream>` tag.
    pub async fn recv_open(&mut self) -> Result<StreamHeader, Error> {
        match self.state {
            State::ClosedNotOpen | State::OpenSent => {}
            _ => return Err(Error::IsOpen),
        }

        loop {
            let ev = match self.reader_mut().next().await {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => return Err(Error::ParseError(e.to_string())),
                None => return Err(Error::Closed),
            };
            match ev {
                rxml::Event::XmlDeclaration(_, _) => continue,
                rxml::Event::StartElement(_, (qns, name), attrs) => {
                    if name.as_str() != "stream" || qns.as_str() != ns::STREAM {
                        return Err(Error::InvalidStreamStart(format!(
                            "expected stream:stream root, got {{{}}}{}",
                            qns.as_str(),
                            name.as_str()
                        )));
                    }
                    let mut header = StreamHeader::default();
                    for ((attr_ns, attr_name), value) in attrs.into_iter() {
                        if attr_ns.is_empty() {
                            match attr_name.as_str() {
                                "to" => header.to = Some(value),
                                "from" => header.from = Some(value),
                                "version" => header.version = Some(value),
                                "id" => header.id = Some(value),
                                _ => {}
                            }
                        } else if attr_ns.as_str() == ns::XML && attr_name.as_str() == "lang" {
                            header.lang = Some(value);
                        }
                    }
                    self.state = match self.state {
                        State::ClosedNotOpen => State::OpenReceived,
                        State::OpenSent => State::BothOpen,
                        _ => unreachable!(),
                    };
                    return Ok(header);
                }
                _ => {
                    return Err(Error::InvalidStreamStart(
                        "expected stream:stream root element first".to_owned(),
                    ))
                }
            }
        }
    }

    /// Sends one stanza. Requires `both-open`.
    pub async fn send_stanza(&mut self, element: &Element) -> Result<(), Error> {
        match self.state {
            State::BothOpen => {}
            State::CloseSent | State::CloseReceived | State::Closed => {
                return Err(Error::IsClosed)
            }
            _ => return Err(Error::NotOpen),
        }

        let mut items = Vec::new();
        stanza::xml::write_items(element, &mut items);
        let mut buf = Vec::new();
        for item in items {
            self.encoder
                .encode(item, &mut buf)
                .map_err(|e| Error::ParseError(e.to_string()))?;
        }
        self.write_half.write_all(&buf).await?;
        self.write_half.flush().await?;
        Ok(())
    }

    /// Receives the next stanza. Requires `both-open`; returns `Closed` once
    /// the peer's `</stream:stream>` arrives.
    pub async fn recv_stanza(&mut self) -> Result<Stanza, Error> {
        match self.state {
            State::BothOpen => {}
            State::CloseSent | State::CloseReceived | State::Closed => {
                return Err(Error::IsClosed)
            }
            _ => return Err(Error::NotOpen),
        }

        loop {
            let ev = match self.reader_mut().next().await {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => return Err(Error::ParseError(e.to_string())),
                None => return Err(Error::Closed),
            };

            if let Some(builder) = self.element_builder.as_mut() {
                if let Some(el) = builder.feed(ev)? {
                    self.element_builder = None;
                    return Ok(Stanza::wrap(el));
                }
                continue;
            }

            match ev {
                rxml::Event::StartElement(_, qname, attrs) => {
                    self.element_builder = Some(ElementBuilder::new(qname, attrs));
                }
                rxml::Event::EndElement(_) => {
                    self.state = match self.state {
                        State::BothOpen => State::CloseReceived,
                        State::CloseSent => State::Closed,
                        other => other,
                    };
                    return Err(Error::Closed);
                }
                rxml::Event::Text(_, _) | rxml::Event::XmlDeclaration(_, _) => {}
            }
        }
    }

    /// Sends the closing `</stream:stream>` tag.
    pub async fn send_close(&mut self) -> Result<(), Error> {
        match self.state {
            State::CloseSent | State::Closed => return Err(Error::IsClosed),
            _ => {}
        }
        self.write_half.write_all(b"</stream:stream>").await?;
        self.write_half.flush().await?;
        self.state = match self.state {
            State::CloseReceived => State::Closed,
            _ => State::CloseSent,
        };
        Ok(())
    }

    /// Discards parser and writer state after a TLS upgrade or a SASL
    /// success, so the next `send_open`/`recv_open` negotiate a fresh
    /// stream over the same transport.
    pub fn reset(&mut self) {
        let read_half = self
            .reader
            .take()
            .expect("reset() called with no reader")
            .into_inner();
        self.reader = Some(rxml::AsyncReader::wrap(read_half, rxml::Parser::default()));
        self.encoder = rxml::writer::Encoder::new();
        self.state = State::ClosedNotOpen;
        self.element_builder = None;
    }

    pub fn is_both_open(&self) -> bool {
        self.state == State::BothOpen
    }

    /// Tears the stream down and hands back the raw halves, e.g. to
    /// recombine into the underlying transport before a TLS handshake.
    pub fn into_parts(self) -> (ReadHalf<Io>, WriteHalf<Io>) {
        let read_half = self
            .reader
            .expect("into_parts() called with no reader")
            .into_inner();
        (read_half, self.write_half)
    }

    /// Splits a both-open stream into independent read and write halves, so
    /// a caller can drive recv and send concurrently instead of serialising
    /// them behind one `&mut self`. The two halves share no state: each
    /// tracks its own direction's half of the close handshake.
    pub fn split(self) -> (ReadPort<Io>, WritePort<Io>) {
        assert_eq!(
            self.state,
            State::BothOpen,
            "split() requires a negotiated, both-open stream"
        );
        let reader = self.reader.expect("both-open stream always has a reader");
        (
            ReadPort {
                reader,
                element_builder: self.element_builder,
                peer_closed: false,
            },
            WritePort {
                write_half: self.write_half,
                encoder: self.encoder,
                self_closed: false,
            },
        )
    }
}

/// The receive half of a [`split`](XmlStream::split) stream.
pub struct ReadPort<Io> {
    reader: rxml::AsyncReader<ReadHalf<Io>>,
    element_builder: Option<ElementBuilder>,
    peer_closed: bool,
}

impl<Io> ReadPort<Io>
where
    Io: tokio::io::AsyncRead + Send + 'static,
{
    /// Receives the next stanza. Returns `Closed` once the peer's
    /// `</stream:stream>` arrives; repeated calls after that keep returning
    /// `Closed` rather than polling a spent reader.
    pub async fn recv_stanza(&mut self) -> Result<Stanza, Error> {
        if self.peer_closed {
            return Err(Error::Closed);
        }
        loop {
            let ev = match self.reader.next().await {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => return Err(Error::ParseError(e.to_string())),
                None => {
                    self.peer_closed = true;
                    return Err(Error::Closed);
                }
            };

            if let Some(builder) = self.element_builder.as_mut() {
                if let Some(el) = builder.feed(ev)? {
                    self.element_builder = None;
                    return Ok(Stanza::wrap(el));
                }
                continue;
            }

            match ev {
                rxml::Event::StartElement(_, qname, attrs) => {
                    self.element_builder = Some(ElementBuilder::new(qname, attrs));
                }
                rxml::Event::EndElement(_) => {
                    self.peer_closed = true;
                    return Err(Error::Closed);
                }
                rxml::Event::Text(_, _) | rxml::Event::XmlDeclaration(_, _) => {}
            }
        }
    }
}

/// The send half of a [`split`](XmlStream::split) stream.
pub struct WritePort<Io> {
    write_half: WriteHalf<Io>,
    encoder: rxml::writer::Encoder,
    self_closed: bool,
}

impl<Io> WritePort<Io>
where
    Io: tokio::io::AsyncWrite + Send + 'static,
{
    pub async fn send_stanza(&mut self, element: &Element) -> Result<(), Error> {
        if self.self_closed {
            return Err(Error::IsClosed);
        }
        let mut items = Vec::new();
        stanza::xml::write_items(element, &mut items);
        let mut buf = Vec::new();
        for item in items {
            self.encoder
                .encode(item, &mut buf)
                .map_err(|e| Error::ParseError(e.to_string()))?;
        }
        self.write_half.write_all(&buf).await?;
        self.write_half.flush().await?;
        Ok(())
    }

    pub async fn send_close(&mut self) -> Result<(), Error> {
        if self.self_closed {
            return Err(Error::IsClosed);
        }
        self.write_half.write_all(b"</stream:stream>").await?;
        self.write_half.flush().await?;
        self.self_closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn negotiates_both_open_and_exchanges_a_stanza() {
        let (client_io, server_io) = duplex(4096);
        let mut client = XmlStream::new(client_io);
        let mut server = XmlStream::new(server_io);

        let client_header = StreamHeader {
            to: Some("example.net".to_owned()),
            from: None,
            version: Some("1.0".to_owned()),
            lang: Some("en".to_owned()),
            id: None,
        };

        let (client_send, server_recv) =
            tokio::join!(client.send_open(&client_header), server.recv_open());
        client_send.unwrap();
        let received = server_recv.unwrap();
        assert_eq!(received.to.as_deref(), Some("example.net"));
        assert_eq!(received.version.as_deref(), Some("1.0"));

        let server_header = StreamHeader {
            id: Some("stream-1".to_owned()),
            version: Some("1.0".to_owned()),
            ..Default::default()
        };
        let (server_send, client_recv) =
            tokio::join!(server.send_open(&server_header), client.recv_open());
        server_send.unwrap();
        let received = client_recv.unwrap();
        assert_eq!(received.id.as_deref(), Some("stream-1"));

        assert!(client.is_both_open());
        assert!(server.is_both_open());

        let iq = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "get")
            .attr("id", "1")
            .build()
            .into_element();
        let (send_res, recv_res) = tokio::join!(client.send_stanza(&iq), server.recv_stanza());
        send_res.unwrap();
        let stanza = recv_res.unwrap();
        assert_eq!(stanza.element().name(), "iq");
        assert_eq!(stanza.element().attr("id"), Some("1"));
    }

    #[tokio::test]
    async fn send_stanza_before_open_fails_not_open() {
        let (client_io, _server_io) = duplex(64);
        let mut client = XmlStream::new(client_io);
        let iq = Element::builder("iq", ns::JABBER_CLIENT).build().into_element();
        let err = client.send_stanza(&iq).await.unwrap_err();
        assert!(matches!(err, Error::NotOpen));
    }
}
