//! The connector: DNS → TCP → stream-open → (see-other-host) → TLS →
//! legacy-auth|SASL → Stream-Management → bind → session, per §4.3. Each
//! step advances a strict monotone state; nothing is revisited within one
//! `connect` call except the single see-other-host restart.

use base64::engine::general_purpose::STANDARD as base64_std;
use base64::Engine;
use uuid::Uuid;

use jid::{BareJid, FullJid};
use sasl::{Credentials, Registry};
use stanza::{ns, Element, Kind, Stanza, SubKind};

use crate::connect::connect_first;
use crate::error::{AuthError, ConnectorError};
use crate::resolve::resolve;
use crate::stream::MaybeTlsStream;
use crate::tls;
use crate::xmlstream::{StreamHeader, XmlStream};

/// Flags and overrides accepted by [`connect`]; defaults match a modern,
/// TLS-required, SCRAM-capable client.
pub struct ConnectOptions {
    pub require_tls: bool,
    pub encrypted_plain_auth_ok: bool,
    pub plaintext_auth_allowed: bool,
    pub legacy: bool,
    pub old_ssl: bool,
    pub explicit_host: Option<(String, u16)>,
    pub request_stream_management: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            require_tls: true,
            encrypted_plain_auth_ok: true,
            plaintext_auth_allowed: false,
            legacy: false,
            old_ssl: false,
            explicit_host: None,
            request_stream_management: false,
        }
    }
}

/// What enabling Stream-Management (XEP-0198) at connect time yielded.
pub struct StreamManagementHandle {
    pub id: String,
    pub resumable: bool,
}

/// The successful outcome of [`connect`]: an authenticated, bound, open
/// framed connection ready to hand to a porter.
pub struct Connected {
    pub stream: XmlStream<MaybeTlsStream>,
    pub jid: FullJid,
    pub stream_id: Option<String>,
    pub stream_management: Option<StreamManagementHandle>,
}

struct Features {
    starttls: bool,
    mechanisms: Vec<String>,
    bind: bool,
    session: bool,
    sm: bool,
    legacy_auth: bool,
}

fn parse_features(stanza: &Stanza) -> Features {
    let el = stanza.element();
    let mechanisms = el
        .get_child("mechanisms", ns::SASL)
        .map(|m| {
            m.children()
                .filter(|c| c.name() == "mechanism")
                .map(|c| c.text())
                .collect()
        })
        .unwrap_or_default();
    Features {
        starttls: el.get_child("starttls", ns::STARTTLS).is_some(),
        mechanisms,
        bind: el.get_child("bind", ns::BIND).is_some(),
        session: el.get_child("session", ns::SESSION).is_some(),
        sm: el.get_child("sm", ns::SM).is_some(),
        legacy_auth: el.get_child("auth", ns::IQ_AUTH_FEATURE).is_some(),
    }
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

async fn open_and_read_features(
    xml: &mut XmlStream<MaybeTlsStream>,
    domain: &str,
) -> Result<(Option<Features>, Option<String>), ConnectorError> {
    let header = StreamHeader {
        to: Some(domain.to_owned()),
        version: Some("1.0".to_owned()),
        lang: Some("en".to_owned()),
        ..Default::default()
    };
    xml.send_open(&header).await?;
    let peer_header = xml.recv_open().await?;

    // Pre-1.0 servers never send a <stream:features/>; in that case the
    // caller must fall through to legacy auth directly.
    if peer_header.version.is_none() {
        return Ok((None, peer_header.id));
    }

    let first = xml.recv_stanza().await?;
    match first.kind() {
        Kind::Features => Ok((Some(parse_features(&first)), peer_header.id)),
        Kind::StreamError => {
            if let Some(host_port) = see_other_host(&first) {
                Err(ConnectorError::SessionFailed(format!(
                    "see-other-host:{}",
                    host_port
                )))
            } else {
                Err(ConnectorError::SessionFailed(
                    "stream error before features".to_owned(),
                ))
            }
        }
        other => Err(ConnectorError::SessionFailed(format!(
            "unexpected element before features: {:?}",
            other
        ))),
    }
}

fn see_other_host(stream_error: &Stanza) -> Option<String> {
    stream_error
        .element()
        .get_child("see-other-host", ns::STREAMS)
        .map(|el| el.text())
}

async fn run_sasl(
    xml: &mut XmlStream<MaybeTlsStream>,
    features: &Features,
    creds: &Credentials,
    allow_plaintext: bool,
) -> Result<(), ConnectorError> {
    let registry = Registry::with_defaults();
    let mut mech = registry.select(&features.mechanisms, allow_plaintext, creds)?;

    let initial = mech.initial_response()?;
    let mut auth_el = Element::builder("auth", ns::SASL)
        .attr("mechanism", mech.name())
        .build()
        .into_element();
    if !initial.is_empty() {
        auth_el.set_text(base64_std.encode(&initial));
    }
    xml.send_stanza(&auth_el).await?;

    loop {
        let reply = xml.recv_stanza().await?;
        match reply.kind() {
            Kind::Challenge => {
                let data = base64_std
                    .decode(reply.element().text())
                    .map_err(|e| AuthError::InvalidReply(e.to_string()))?;
                let response = mech.handle_challenge(&data)?;
                let mut resp_el = Element::new("response", ns::SASL);
                if !response.is_empty() {
                    resp_el.set_text(base64_std.encode(&response));
                }
                xml.send_stanza(&resp_el).await?;
            }
            Kind::Success => {
                let text = reply.element().text();
                let data = if text.is_empty() {
                    Vec::new()
                } else {
                    base64_std
                        .decode(text)
                        .map_err(|e| AuthError::InvalidReply(e.to_string()))?
                };
                mech.handle_success(&data)?;
                return Ok(());
            }
            Kind::Failure => {
                let condition = reply
                    .element()
                    .children()
                    .next()
                    .map(|c| c.name().to_owned())
                    .unwrap_or_else(|| "unknown-condition".to_owned());
                return Err(ConnectorError::Auth(AuthError::Failure(condition)));
            }
            other => {
                return Err(ConnectorError::SessionFailed(format!(
                    "unexpected element during SASL: {:?}",
                    other
                )))
            }
        }
    }
}

async fn run_legacy_auth(
    xml: &mut XmlStream<MaybeTlsStream>,
    creds: &Credentials,
    resource: &str,
    stream_id: &str,
    allow_plaintext: bool,
) -> Result<(), ConnectorError> {
    let discovery_id = gen_id();
    xml.send_stanza(&sasl::legacy::discovery_request(&discovery_id, &creds.username))
        .await?;
    let reply = xml.recv_stanza().await?;
    let query = reply
        .element()
        .get_child("query", ns::JABBER_IQ_AUTH)
        .ok_or_else(|| ConnectorError::SessionFailed("legacy auth discovery had no query".to_owned()))?;
    let offered = sasl::legacy::parse_discovery_reply(query);

    let login_id = gen_id();
    let request = if offered.digest {
        sasl::legacy::digest_login_request(&login_id, &creds.username, resource, stream_id, &creds.password)
    } else if offered.plaintext_password && allow_plaintext {
        sasl::legacy::plaintext_login_request(&login_id, &creds.username, resource, &creds.password)
    } else {
        return Err(ConnectorError::Auth(AuthError::NoSupportedMechanisms));
    };
    xml.send_stanza(&request).await?;
    let reply = xml.recv_stanza().await?;
    sasl::legacy::interpret_login_reply(reply.element())
        .map_err(|e| ConnectorError::Auth(AuthError::Failure(e.to_string())))
}

async fn run_bind(
    xml: &mut XmlStream<MaybeTlsStream>,
    requested_resource: Option<&str>,
) -> Result<FullJid, ConnectorError> {
    let id = gen_id();
    let mut builder = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "set")
        .attr("id", &id)
        .open_child_ns("bind", ns::BIND);
    if let Some(resource) = requested_resource {
        builder = builder.open_child("resource").set_content(resource).close_child();
    }
    let request = builder.close_child().build().into_element();
    xml.send_stanza(&request).await?;

    let reply = xml.recv_stanza().await?;
    if reply.sub_kind() != SubKind::Result_ {
        return Err(ConnectorError::BindFailed(
            "server returned an error for resource bind".to_owned(),
        ));
    }
    let jid_text = reply
        .element()
        .get_child("bind", ns::BIND)
        .and_then(|b| b.get_child("jid", ns::BIND))
        .map(|j| j.text())
        .ok_or_else(|| ConnectorError::BindFailed("bind reply had no jid".to_owned()))?;
    jid_text
        .parse::<FullJid>()
        .map_err(|_| ConnectorError::BindFailed(format!("server returned an unparsable jid: {}", jid_text)))
}

async fn run_session(xml: &mut XmlStream<MaybeTlsStream>) -> Result<(), ConnectorError> {
    let id = gen_id();
    let request = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "set")
        .attr("id", &id)
        .open_child_ns("session", ns::SESSION)
        .close_child()
        .build()
        .into_element();
    xml.send_stanza(&request).await?;
    let reply = xml.recv_stanza().await?;
    if reply.sub_kind() != SubKind::Result_ {
        return Err(ConnectorError::SessionFailed(
            "server returned an error for session establishment".to_owned(),
        ));
    }
    Ok(())
}

async fn run_enable_sm(
    xml: &mut XmlStream<MaybeTlsStream>,
) -> Result<Option<StreamManagementHandle>, ConnectorError> {
    let enable = Element::builder("enable", ns::SM)
        .attr("resume", "true")
        .build()
        .into_element();
    xml.send_stanza(&enable).await?;
    let reply = xml.recv_stanza().await?;
    match reply.element().name() {
        "enabled" if reply.element().ns() == ns::SM => Ok(Some(StreamManagementHandle {
            id: reply.element().attr("id").unwrap_or_default().to_owned(),
            resumable: reply.element().attr("resume") == Some("true"),
        })),
        "failed" if reply.element().ns() == ns::SM => Ok(None),
        _ => Ok(None),
    }
}

/// Runs the whole DNS→TCP→stream→TLS→auth→bind→session sequence, returning
/// the opened, authenticated framed connection.
pub async fn connect(
    bare: &BareJid,
    password: &str,
    resource: Option<&str>,
    options: ConnectOptions,
) -> Result<Connected, ConnectorError> {
    let domain = bare.domain().to_owned();
    let explicit = options
        .explicit_host
        .as_ref()
        .map(|(h, p)| (h.as_str(), *p));

    let mut addrs = resolve(&domain, explicit).await?;
    let mut see_other_host_used = false;

    loop {
        let tcp = connect_first(&addrs).await?;

        let io = if options.old_ssl {
            let connector = tls::native_connector()?;
            let tls_stream = tls::handshake(&connector, &domain, tcp).await?;
            MaybeTlsStream::Tls(Box::new(tls_stream))
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let mut xml = XmlStream::new(io);
        let (features, mut stream_id) = match open_and_read_features(&mut xml, &domain).await {
            Ok(v) => v,
            Err(ConnectorError::SessionFailed(msg)) if msg.starts_with("see-other-host:") && !see_other_host_used => {
                see_other_host_used = true;
                let target = msg.trim_start_matches("see-other-host:").to_owned();
                let (host, port) = split_host_port(&target);
                addrs = resolve(&host, Some((host.as_str(), port))).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let (mut xml, features, tls_active) = match features {
            Some(f) if f.starttls && !options.old_ssl => {
                xml.send_stanza(&Element::new("starttls", ns::STARTTLS)).await?;
                let reply = xml.recv_stanza().await?;
                if reply.element().name() != "proceed" {
                    return Err(ConnectorError::TlsCert(crate::error::TlsCertError::Internal(
                        "server refused STARTTLS after advertising it".to_owned(),
                    )));
                }
                let (read_half, write_half) = xml.into_parts();
                let raw = tokio::io::unsplit(read_half, write_half);
                let tcp = match raw {
                    MaybeTlsStream::Plain(tcp) => tcp,
                    MaybeTlsStream::Tls(_) => {
                        return Err(ConnectorError::TlsCert(crate::error::TlsCertError::Internal(
                            "channel already TLS before STARTTLS".to_owned(),
                        )))
                    }
                };
                let connector = tls::native_connector()?;
                let tls_stream = tls::handshake(&connector, &domain, tcp).await?;
                let io = MaybeTlsStream::Tls(Box::new(tls_stream));
                let mut xml = XmlStream::new(io);
                let (features, new_id) = open_and_read_features(&mut xml, &domain).await?;
                stream_id = new_id.or(stream_id);
                (xml, features.unwrap_or(Features {
                    starttls: false,
                    mechanisms: Vec::new(),
                    bind: true,
                    session: false,
                    sm: false,
                    legacy_auth: false,
                }), true)
            }
            Some(f) => {
                if options.require_tls && !options.old_ssl {
                    return Err(ConnectorError::TlsUnavailable);
                }
                let tls_active = options.old_ssl;
                (xml, f, tls_active)
            }
            None => (
                xml,
                Features {
                    starttls: false,
                    mechanisms: Vec::new(),
                    bind: true,
                    session: false,
                    sm: false,
                    legacy_auth: true,
                },
                options.old_ssl,
            ),
        };

        let creds = Credentials::new(bare.node().unwrap_or_default(), password);
        let allow_plaintext = if tls_active {
            options.encrypted_plain_auth_ok
        } else {
            options.plaintext_auth_allowed
        };

        if options.legacy || features.legacy_auth || !tls_active && features.mechanisms.is_empty() {
            run_legacy_auth(
                &mut xml,
                &creds,
                resource.unwrap_or(""),
                stream_id.as_deref().unwrap_or(""),
                allow_plaintext,
            )
            .await?;
        } else {
            run_sasl(&mut xml, &features, &creds, allow_plaintext).await?;
            xml.reset();
            let (post_auth_features, new_id) = open_and_read_features(&mut xml, &domain).await?;
            stream_id = new_id.or(stream_id);
            let refreshed = post_auth_features.unwrap_or(Features {
                starttls: false,
                mechanisms: Vec::new(),
                bind: true,
                session: false,
                sm: false,
                legacy_auth: false,
            });

            let sm_handle = if refreshed.sm && options.request_stream_management {
                run_enable_sm(&mut xml).await?
            } else {
                None
            };

            let full_jid = run_bind(&mut xml, resource).await?;
            if refreshed.session {
                run_session(&mut xml).await?;
            }

            return Ok(Connected {
                stream: xml,
                jid: full_jid,
                stream_id,
                stream_management: sm_handle,
            });
        }

        // Legacy auth path: bind/session do not apply, the login iq itself
        // carried the resource.
        let full_jid = bare
            .with_resource(resource.unwrap_or("legacy"))
            .map_err(|_| ConnectorError::BindFailed("resource rejected by jid parser".to_owned()))?;
        return Ok(Connected {
            stream: xml,
            jid: full_jid,
            stream_id,
            stream_management: None,
        });
    }
}

fn split_host_port(target: &str) -> (String, u16) {
    match target.rsplit_once(':') {
        Some((host, port)) => (host.to_owned(), port.parse().unwrap_or(5222)),
        None => (target.to_owned(), 5222),
    }
}
