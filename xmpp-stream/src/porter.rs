//! The porter: a stanza multiplexer sitting on top of a negotiated
//! [`XmlStream`], per §4.4. Owns the connection for the lifetime of the
//! session, dispatching incoming stanzas to registered handlers and
//! correlating IQ replies with their requests.
//!
//! Lifecycle: created-stopped → started → closing → closed | force-closing
//! → closed. [`Porter::new`] constructs in created-stopped; [`Porter::start`]
//! spawns the background task that drives the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{mpsc, oneshot};

use jid::{BareJid, Jid};
use stanza::{ns, Element, Kind, Stanza, SubKind};

use crate::error::PorterError as Error;
use crate::stream::MaybeTlsStream;
use crate::xmlstream::{ReadPort, WritePort, XmlStream};

/// Which `from` a handler accepts, per §4.4.2's "from matching" rules.
#[derive(Clone)]
pub enum FromMatch {
    /// Matches any sender, including stanzas with no `from` at all.
    Any,
    /// Matches exactly this bare JID, and any full JID sharing it.
    Bare(BareJid),
    /// Matches only this exact full JID string.
    Full(String),
}

impl FromMatch {
    fn matches(&self, from: Option<&str>, account: &BareJid) -> bool {
        match self {
            FromMatch::Any => true,
            FromMatch::Bare(bare) => match from {
                None => *bare == *account,
                Some(f) => match f.parse::<Jid>() {
                    Ok(jid) => jid.to_bare() == *bare,
                    Err(_) => false,
                },
            },
            FromMatch::Full(full) => match from {
                None => false,
                Some(f) => f == full,
            },
        }
    }
}

/// A structural template: the stanza matches if every templated element has
/// a present counterpart (name, namespace, each specified attribute's
/// value; text when the template specifies it). Child order and extra
/// attributes/elements in the stanza are ignored.
#[derive(Clone)]
pub struct MatchTemplate(Element);

impl MatchTemplate {
    pub fn new(template: Element) -> Self {
        MatchTemplate(template)
    }

    fn matches(&self, stanza: &Element) -> bool {
        Self::element_matches(&self.0, stanza)
    }

    fn element_matches(template: &Element, actual: &Element) -> bool {
        if template.name() != actual.name() || template.ns() != actual.ns() {
            return false;
        }
        for attr in template.attrs() {
            let found = match &attr.namespace {
                Some(ns) => actual.attr_ns(&attr.name, ns),
                None => actual.attr(&attr.name),
            };
            if found != Some(attr.value.as_str()) {
                return false;
            }
        }
        let template_text = template.text();
        if !template_text.is_empty() && template_text != actual.text() {
            return false;
        }
        template.children().all(|child| {
            actual
                .children()
                .any(|candidate| Self::element_matches(child, candidate))
        })
    }
}

/// A registered dispatch entry's identity, returned by
/// [`Porter::register_handler`] and accepted by [`Porter::unregister_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerHandle(u64);

type Callback = Box<dyn Fn(&Stanza) -> bool + Send + Sync>;

struct HandlerEntry {
    handle: HandlerHandle,
    kind: Option<Kind>,
    sub_kind: Option<SubKind>,
    from: FromMatch,
    priority: i32,
    insertion: u64,
    match_tree: Option<MatchTemplate>,
    callback: Callback,
}

enum LifecycleState {
    CreatedStopped,
    Started,
    Closing,
    ForceClosing,
    Closed,
}

struct IqWaiter {
    reply: oneshot::Sender<Result<Stanza, Error>>,
    /// The request's `to` attribute, checked against the reply's `from` per
    /// §3's spoof guard: same id is not enough on its own.
    expected_to: Option<String>,
}

/// Removes its id from the correlation table on drop, the way
/// `tokio-xmpp`'s `IqMapEntryHandle` ties table membership to the response
/// future's lifetime instead of an explicit cancel call.
struct IqTableGuard {
    id: String,
    shared: Weak<Shared>,
}

impl Drop for IqTableGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.iq_table.lock().unwrap().remove(&self.id);
        }
    }
}

enum Command {
    /// The `Option<u64>` is the `pending_sends` key for `send_async`
    /// callers; fire-and-forget `send()` passes `None` and is untracked.
    Send(Element, Option<u64>),
    Close,
    ForceClose,
}

struct Shared {
    account: BareJid,
    handlers: Mutex<Vec<HandlerEntry>>,
    next_handler_id: AtomicU64,
    next_insertion: AtomicU64,
    next_send_id: AtomicU64,
    iq_table: Mutex<HashMap<String, IqWaiter>>,
    pending_sends: Mutex<HashMap<u64, oneshot::Sender<Result<(), Error>>>>,
    /// Set while a `close_async` call is awaiting either peer close (read
    /// loop exit, resolved `Ok`) or a subsequent force-close (resolved
    /// `Err(ForceClosing)`).
    close_waiter: Mutex<Option<oneshot::Sender<Result<(), Error>>>>,
    state: Mutex<LifecycleState>,
    sm: Mutex<Option<SmCounters>>,
    started: AtomicBool,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

/// Stream-Management (XEP-0198) accounting, per §4.4.3.
#[derive(Debug, Clone, Copy, Default)]
struct SmCounters {
    snt_count: u32,
    rcv_count: u32,
    snt_acked: u32,
    reqs_outstanding: u32,
}

/// A stanza multiplexer over one negotiated framed connection.
///
/// Cheaply `Clone`-able: clones share the same background task and dispatch
/// tables. Only the instance that calls [`start`](Self::start) ever sees
/// the not-yet-split `XmlStream`; clones made afterwards simply share
/// `shared` and issue commands through it.
pub struct Porter {
    shared: Arc<Shared>,
    stream: Mutex<Option<XmlStream<MaybeTlsStream>>>,
}

impl Clone for Porter {
    fn clone(&self) -> Self {
        Porter {
            shared: Arc::clone(&self.shared),
            stream: Mutex::new(None),
        }
    }
}

impl Porter {
    /// Builds a porter in `created-stopped` state from a negotiated
    /// connection and the account's bare JID (used to resolve `from ==
    /// None` against the bare-JID filter).
    pub fn new(stream: XmlStream<MaybeTlsStream>, account: BareJid) -> Self {
        Porter {
            shared: Arc::new(Shared {
                account,
                handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(0),
                next_insertion: AtomicU64::new(0),
                next_send_id: AtomicU64::new(0),
                iq_table: Mutex::new(HashMap::new()),
                pending_sends: Mutex::new(HashMap::new()),
                close_waiter: Mutex::new(None),
                state: Mutex::new(LifecycleState::CreatedStopped),
                sm: Mutex::new(None),
                started: AtomicBool::new(false),
                cmd_tx: Mutex::new(None),
            }),
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Enables Stream-Management accounting with fresh (zeroed) counters.
    /// Call before [`start`](Self::start) if the connector negotiated SM.
    pub fn enable_stream_management(&self) {
        *self.shared.sm.lock().unwrap() = Some(SmCounters::default());
    }

    /// Posts the first recv and spawns the background task. Error if
    /// already started.
    pub fn start(&self) -> Result<(), Error> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .expect("start() called twice despite the started guard");
        let (read_port, write_port) = stream.split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.shared.cmd_tx.lock().unwrap() = Some(cmd_tx);
        *self.shared.state.lock().unwrap() = LifecycleState::Started;

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            run_writer(write_port, cmd_rx, Arc::clone(&shared)).await;
        });
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            run_reader(read_port, shared).await;
        });
        Ok(())
    }

    fn send_command(&self, cmd: Command) -> Result<(), Error> {
        send_via_shared(&self.shared, cmd)
    }

    /// Fire-and-forget send. Injects an id on iq-get/set stanzas with none.
    pub fn send(&self, mut stanza: Element) -> Result<(), Error> {
        inject_iq_id(&mut stanza);
        self.send_command(Command::Send(stanza, None))
    }

    /// Completes once the write is committed to the underlying stream, or
    /// fails with [`Error::Closing`] if a force-close drains it first while
    /// still queued. Dropping the returned future before that point does
    /// not retract an already-enqueued send; cancellation only prevents the
    /// caller from observing completion.
    pub async fn send_async(&self, mut stanza: Element) -> Result<(), Error> {
        inject_iq_id(&mut stanza);
        let send_id = self.shared.next_send_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending_sends.lock().unwrap().insert(send_id, tx);
        if let Err(e) = self.send_command(Command::Send(stanza, Some(send_id))) {
            self.shared.pending_sends.lock().unwrap().remove(&send_id);
            return Err(e);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }

    /// Sends an iq-get/iq-set and awaits the correlated reply. Errors with
    /// [`Error::NotIq`] if `stanza` is not iq-get/iq-set. Dropping the
    /// returned future cancels the wait and removes the id from the
    /// correlation table (via `_guard`'s `Drop`), matching the "cancellation
    /// removes the id from the table" rule. The reply must carry the same
    /// id and a `from` matching the request's `to` (or this account's bare
    /// or full JID, or be absent if the request's `to` was absent) per §3's
    /// spoof guard; anything else is left for handler dispatch.
    pub async fn send_iq(&self, mut stanza: Element) -> Result<Stanza, Error> {
        if stanza.name() != "iq" || !matches!(stanza.attr("type"), Some("get") | Some("set")) {
            return Err(Error::NotIq);
        }
        let id = ensure_id(&mut stanza);
        let expected_to = stanza.attr("to").map(|s| s.to_owned());
        let (tx, rx) = oneshot::channel();
        self.shared.iq_table.lock().unwrap().insert(
            id.clone(),
            IqWaiter {
                reply: tx,
                expected_to,
            },
        );
        let _guard = IqTableGuard {
            id: id.clone(),
            shared: Arc::downgrade(&self.shared),
        };

        self.send_command(Command::Send(stanza, None))?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }

    /// Adds a dispatch entry; higher `priority` runs first, ties broken by
    /// registration order.
    pub fn register_handler(
        &self,
        kind: Option<Kind>,
        sub_kind: Option<SubKind>,
        from: FromMatch,
        priority: i32,
        match_tree: Option<MatchTemplate>,
        callback: impl Fn(&Stanza) -> bool + Send + Sync + 'static,
    ) -> HandlerHandle {
        let handle = HandlerHandle(self.shared.next_handler_id.fetch_add(1, Ordering::SeqCst));
        let insertion = self.shared.next_insertion.fetch_add(1, Ordering::SeqCst);
        let entry = HandlerEntry {
            handle,
            kind,
            sub_kind,
            from,
            priority,
            insertion,
            match_tree,
            callback: Box::new(callback),
        };
        let mut handlers = self.shared.handlers.lock().unwrap();
        handlers.push(entry);
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.insertion.cmp(&b.insertion)));
        handle
    }

    pub fn unregister_handler(&self, handle: HandlerHandle) {
        self.shared.handlers.lock().unwrap().retain(|h| h.handle != handle);
    }

    /// Flushes writes, sends `</stream>`, and completes once the peer's
    /// close arrives. Fails with [`Error::ForceClosing`] if
    /// [`force_close_async`](Self::force_close_async) is called first.
    pub async fn close_async(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        *self.shared.close_waiter.lock().unwrap() = Some(tx);
        *self.shared.state.lock().unwrap() = LifecycleState::Closing;
        if let Err(e) = self.send_command(Command::Close) {
            self.shared.close_waiter.lock().unwrap().take();
            return Err(e);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closed),
        }
    }

    /// Immediate teardown: pending sends fail with `Closing`, pending IQ
    /// futures and an outstanding `close_async` future (if any) fail with
    /// `ForceClosing`. This call itself always completes `Ok`.
    pub async fn force_close_async(&self) -> Result<(), Error> {
        force_close_now(&self.shared);
        Ok(())
    }
}

fn send_via_shared(shared: &Arc<Shared>, cmd: Command) -> Result<(), Error> {
    let guard = shared.cmd_tx.lock().unwrap();
    match guard.as_ref() {
        Some(tx) => tx.send(cmd).map_err(|_| Error::Closed),
        None => Err(Error::NotStarted),
    }
}

fn inject_iq_id(stanza: &mut Element) {
    if stanza.name() == "iq" && matches!(stanza.attr("type"), Some("get") | Some("set")) {
        ensure_id(stanza);
    }
}

fn ensure_id(stanza: &mut Element) -> String {
    if let Some(existing) = stanza.attr("id") {
        return existing.to_owned();
    }
    let id = uuid::Uuid::new_v4().to_string();
    stanza.set_attr("id", id.clone());
    id
}

async fn run_writer(
    mut write: WritePort<MaybeTlsStream>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Send(element, send_id) => {
                let ack = match send_id {
                    Some(id) => match shared.pending_sends.lock().unwrap().remove(&id) {
                        Some(ack) => Some(ack),
                        // Already failed by a force-close drain; the send
                        // itself must not reach the wire.
                        None => continue,
                    },
                    None => {
                        if matches!(*shared.state.lock().unwrap(), LifecycleState::ForceClosing) {
                            continue;
                        }
                        None
                    }
                };
                let counts_toward_sm = !is_sm_ack_frame(&element);
                match write.send_stanza(&element).await {
                    Ok(()) => {
                        if counts_toward_sm {
                            if let Some(sm) = shared.sm.lock().unwrap().as_mut() {
                                sm.snt_count = sm.snt_count.wrapping_add(1);
                            }
                        }
                        if let Some(ack) = ack {
                            let _ = ack.send(Ok(()));
                        }
                    }
                    Err(e) => {
                        log::warn!("porter write failed, shutting down: {}", e);
                        if let Some(ack) = ack {
                            let _ = ack.send(Err(Error::Closed));
                        }
                        break;
                    }
                }
            }
            Command::Close => {
                let _ = write.send_close().await;
            }
            Command::ForceClose => break,
        }
    }
    teardown(&shared);
}

async fn run_reader(mut read: ReadPort<MaybeTlsStream>, shared: Arc<Shared>) {
    loop {
        match read.recv_stanza().await {
            Ok(stanza) => dispatch(stanza, &shared),
            Err(_) => break,
        }
    }
    teardown(&shared);
}

fn close_reason(shared: &Arc<Shared>) -> Error {
    match *shared.state.lock().unwrap() {
        LifecycleState::ForceClosing => Error::ForceClosing,
        _ => Error::Closed,
    }
}

/// Common shutdown path for both background tasks: marks the porter
/// closed and fails anything still waiting.
fn teardown(shared: &Arc<Shared>) {
    let reason = close_reason(shared);
    *shared.state.lock().unwrap() = LifecycleState::Closed;
    fail_pending_sends(shared, reason);
    fail_pending_iqs(shared, reason);
    let close_result = if reason == Error::ForceClosing {
        Err(reason)
    } else {
        Ok(())
    };
    resolve_close_waiter(shared, close_result);
}

/// Immediate force-close: fails everything still outstanding before the
/// background tasks even notice, then asks them to wind down.
fn force_close_now(shared: &Arc<Shared>) {
    *shared.state.lock().unwrap() = LifecycleState::ForceClosing;
    fail_pending_sends(shared, Error::Closing);
    fail_pending_iqs(shared, Error::ForceClosing);
    resolve_close_waiter(shared, Err(Error::ForceClosing));
    let _ = send_via_shared(shared, Command::ForceClose);
}

fn fail_pending_iqs(shared: &Arc<Shared>, reason: Error) {
    let mut table = shared.iq_table.lock().unwrap();
    for (_, waiter) in table.drain() {
        let _ = waiter.reply.send(Err(reason));
    }
}

fn fail_pending_sends(shared: &Arc<Shared>, reason: Error) {
    let mut table = shared.pending_sends.lock().unwrap();
    for (_, ack) in table.drain() {
        let _ = ack.send(Err(reason));
    }
}

fn resolve_close_waiter(shared: &Arc<Shared>, result: Result<(), Error>) {
    if let Some(tx) = shared.close_waiter.lock().unwrap().take() {
        let _ = tx.send(result);
    }
}

fn iq_reply_matches(expected_to: &Option<String>, reply_from: Option<&str>, account: &BareJid) -> bool {
    let is_account_jid =
        |from: &str| from.parse::<Jid>().map(|jid| jid.to_bare() == *account).unwrap_or(false);
    match (expected_to.as_deref(), reply_from) {
        (Some(to), Some(from)) => from == to || is_account_jid(from),
        (Some(_), None) => false,
        (None, Some(from)) => is_account_jid(from),
        (None, None) => true,
    }
}

fn is_sm_ack_frame(element: &Element) -> bool {
    element.ns() == ns::SM && matches!(element.name(), "r" | "a")
}

fn dispatch(stanza: Stanza, shared: &Arc<Shared>) {
    let el = stanza.element();
    if el.ns() == ns::SM {
        match el.name() {
            "a" => {
                if let Some(h) = el.attr("h").and_then(|v| v.parse::<u32>().ok()) {
                    let mut sm_guard = shared.sm.lock().unwrap();
                    if let Some(sm) = sm_guard.as_mut() {
                        if !ack_is_within_range(h, sm.snt_count) {
                            log::warn!(
                                "server acked {} but only {} stanzas were sent; undefined-condition",
                                h,
                                sm.snt_count
                            );
                            drop(sm_guard);
                            force_close_now(shared);
                            return;
                        }
                        sm.snt_acked = h;
                        sm.reqs_outstanding = sm.reqs_outstanding.saturating_sub(1);
                    }
                }
                return;
            }
            "r" => {
                let rcv_count = shared
                    .sm
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|sm| sm.rcv_count)
                    .unwrap_or(0);
                let ack = Element::builder("a", ns::SM)
                    .attr("h", rcv_count.to_string())
                    .build()
                    .into_element();
                let _ = send_via_shared(shared, Command::Send(ack, None));
                return;
            }
            _ => {}
        }
    } else if let Some(sm) = shared.sm.lock().unwrap().as_mut() {
        sm.rcv_count = sm.rcv_count.wrapping_add(1);
    }

    if matches!(stanza.kind(), Kind::Iq) && matches!(stanza.sub_kind(), SubKind::Result_ | SubKind::Error) {
        if let Some(id) = stanza.id() {
            let matched = {
                let mut table = shared.iq_table.lock().unwrap();
                let spoof_checked = table
                    .get(id)
                    .map(|waiter| iq_reply_matches(&waiter.expected_to, stanza.from(), &shared.account))
                    .unwrap_or(false);
                if spoof_checked {
                    table.remove(id)
                } else {
                    None
                }
            };
            if let Some(waiter) = matched {
                let _ = waiter.reply.send(Ok(stanza));
                return;
            }
            // Unknown id, or an id we know but whose `from` doesn't pass
            // the spoof guard: fall through to handler dispatch.
        }
    }

    let handlers = shared.handlers.lock().unwrap();
    for entry in handlers.iter() {
        if let Some(kind) = &entry.kind {
            if *kind != stanza.kind() {
                continue;
            }
        }
        if let Some(sub_kind) = &entry.sub_kind {
            if *sub_kind != stanza.sub_kind() {
                continue;
            }
        }
        if !entry.from.matches(stanza.from(), &shared.account) {
            continue;
        }
        if let Some(tree) = &entry.match_tree {
            if !tree.matches(stanza.element()) {
                continue;
            }
        }
        if (entry.callback)(&stanza) {
            break;
        }
    }
}

fn wrapping_diff(h: u32, snt: u32) -> u32 {
    snt.wrapping_sub(h)
}

fn ack_is_within_range(h: u32, snt: u32) -> bool {
    // The server may ack up to (and including) `snt` modulo 2^32; anything
    // strictly past that, accounting for wraparound, is the undefined
    // condition per §4.4.3.
    wrapping_diff(h, snt) < (u32::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_shared(account: BareJid) -> Arc<Shared> {
        Arc::new(Shared {
            account,
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(0),
            next_insertion: AtomicU64::new(0),
            next_send_id: AtomicU64::new(0),
            iq_table: Mutex::new(HashMap::new()),
            pending_sends: Mutex::new(HashMap::new()),
            close_waiter: Mutex::new(None),
            state: Mutex::new(LifecycleState::Started),
            sm: Mutex::new(None),
            started: AtomicBool::new(true),
            cmd_tx: Mutex::new(None),
        })
    }

    fn iq_result(id: &str, from: Option<&str>) -> Stanza {
        let mut builder = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "result")
            .attr("id", id);
        if let Some(from) = from {
            builder = builder.attr("from", from);
        }
        Stanza::wrap(builder.build().into_element())
    }

    #[test]
    fn iq_reply_matches_scenario_four_spoof_guard() {
        let account: BareJid = "alice@example.net".parse().unwrap();
        let expected_to = Some("romeo@example.net".to_owned());
        assert!(!iq_reply_matches(&expected_to, Some("oscar@example.net"), &account));
        assert!(iq_reply_matches(&expected_to, Some("romeo@example.net"), &account));
    }

    #[test]
    fn iq_reply_matches_account_jid_or_absence_when_to_absent() {
        let account: BareJid = "alice@example.net".parse().unwrap();
        assert!(iq_reply_matches(&None, Some("alice@example.net/home"), &account));
        assert!(iq_reply_matches(&None, None, &account));
        assert!(!iq_reply_matches(&None, Some("mallory@example.net"), &account));
    }

    #[test]
    fn dispatch_ignores_spoofed_iq_reply_then_accepts_the_real_one() {
        let account: BareJid = "alice@example.net".parse().unwrap();
        let shared = test_shared(account);
        let (tx, rx) = oneshot::channel();
        shared.iq_table.lock().unwrap().insert(
            "1".to_owned(),
            IqWaiter {
                reply: tx,
                expected_to: Some("romeo@example.net".to_owned()),
            },
        );

        dispatch(iq_result("1", Some("oscar@example.net")), &shared);
        assert!(shared.iq_table.lock().unwrap().contains_key("1"), "spoofed reply must not retire the id");

        dispatch(iq_result("1", Some("romeo@example.net")), &shared);
        assert!(!shared.iq_table.lock().unwrap().contains_key("1"));
        let reply = rx.try_recv().expect("future should have completed");
        assert_eq!(reply.unwrap().from(), Some("romeo@example.net"));
    }

    #[test]
    fn dispatch_passes_spoofed_reply_on_to_handlers() {
        let account: BareJid = "alice@example.net".parse().unwrap();
        let shared = test_shared(account);
        let (tx, _rx) = oneshot::channel();
        shared.iq_table.lock().unwrap().insert(
            "1".to_owned(),
            IqWaiter {
                reply: tx,
                expected_to: Some("romeo@example.net".to_owned()),
            },
        );

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = Arc::clone(&seen);
        shared.handlers.lock().unwrap().push(HandlerEntry {
            handle: HandlerHandle(0),
            kind: None,
            sub_kind: None,
            from: FromMatch::Any,
            priority: 0,
            insertion: 0,
            match_tree: None,
            callback: Box::new(move |_| {
                seen_in_handler.fetch_add(1, Ordering::SeqCst);
                true
            }),
        });

        dispatch(iq_result("1", Some("oscar@example.net")), &shared);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(shared.iq_table.lock().unwrap().contains_key("1"));
    }

    #[test]
    fn from_match_bare_accepts_any_resource() {
        let account: BareJid = "juliet@example.net".parse().unwrap();
        let filter = FromMatch::Bare(account.clone());
        assert!(filter.matches(Some("juliet@example.net/balcony"), &account));
        assert!(filter.matches(None, &account));
        assert!(!filter.matches(Some("romeo@example.net"), &account));
    }

    #[test]
    fn from_match_full_requires_exact_string() {
        let account: BareJid = "juliet@example.net".parse().unwrap();
        let filter = FromMatch::Full("juliet@example.net/balcony".to_owned());
        assert!(filter.matches(Some("juliet@example.net/balcony"), &account));
        assert!(!filter.matches(Some("juliet@example.net/orchard"), &account));
    }

    #[test]
    fn from_match_any_accepts_everything() {
        let account: BareJid = "juliet@example.net".parse().unwrap();
        assert!(FromMatch::Any.matches(None, &account));
        assert!(FromMatch::Any.matches(Some("anyone@anywhere.net"), &account));
    }

    #[test]
    fn match_template_ignores_extra_attributes_and_children() {
        let template = Element::builder("query", "jabber:iq:roster").build().into_element();
        let actual = Element::builder("query", "jabber:iq:roster")
            .attr("ver", "1")
            .open_child("item")
            .close_child()
            .build()
            .into_element();
        assert!(MatchTemplate::new(template).matches(&actual));
    }

    #[test]
    fn match_template_requires_specified_attribute_value() {
        let template = Element::builder("query", "jabber:iq:roster")
            .attr("ver", "2")
            .build()
            .into_element();
        let actual = Element::builder("query", "jabber:iq:roster")
            .attr("ver", "1")
            .build()
            .into_element();
        assert!(!MatchTemplate::new(template).matches(&actual));
    }

    #[test]
    fn ensure_id_reuses_existing_id() {
        let mut stanza = Element::builder("iq", ns::JABBER_CLIENT)
            .attr("type", "get")
            .attr("id", "fixed")
            .build()
            .into_element();
        assert_eq!(ensure_id(&mut stanza), "fixed");
    }

    #[test]
    fn inject_iq_id_leaves_non_iq_untouched() {
        let mut stanza = Element::builder("message", ns::JABBER_CLIENT).build().into_element();
        inject_iq_id(&mut stanza);
        assert_eq!(stanza.attr("id"), None);
    }
}
