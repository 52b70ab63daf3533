//! Wire Protocol Engine
//!
//! Drains the request ring, frames and dispatches requests against the
//! store, fills the response ring, and multiplexes unsolicited watch
//! events onto the same channel.
//!
//! ## Session State Machine
//!
//! ```text
//! idle → request-accumulating → dispatching → response-pending → idle
//! ```
//!
//! At most one request is ever in flight: a new request is not read from
//! the ring while a response (ordinary or watch event) is pending, which
//! yields strict per-channel ordering. Watch events generated while the
//! channel is busy queue in FIFO order and drain opportunistically, always
//! behind any in-flight request/response pair.
//!
//! A declared payload length above the configured maximum is a fatal
//! channel error: the session refuses further traffic until `reset`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::BytesMut;

use crate::error::{Result, XsError};
use crate::path;
use crate::perms::{Caller, Perm};
use crate::store::Store;
use crate::wire::codec::{
    decode_header, encode_frame, join_strings, parse_string_list, parse_strings, split_field,
    HEADER_SIZE,
};
use crate::wire::message::{MsgHeader, Op, NO_TRANSACTION, WATCH_EVENT_REQ_ID};
use crate::wire::ring::Channel;

/// The canonical success payload for mutating operations
const OK_PAYLOAD: &[u8] = b"OK\0";

/// A per-peer protocol session over one bidirectional channel
pub struct WireSession<C: Channel> {
    /// Shared store; single-threaded by contract
    store: Rc<RefCell<Store>>,

    /// The ring transport
    channel: C,

    /// Identity of the peer, determined externally
    caller: Caller,

    /// Request staging buffer (header plus accumulating payload)
    req_buf: BytesMut,

    /// Response bytes staged but not yet pushed into the ring
    rsp_buf: BytesMut,

    /// A response (ordinary or watch event) is in flight
    rsp_pending: bool,

    /// Watch events deferred because the channel was busy
    events: Rc<RefCell<VecDeque<(String, String)>>>,

    /// The single delivery handler behind every watch this session owns;
    /// its identity participates in unwatch matching
    event_sink: crate::store::WatchHandler,

    /// Channel is broken until reset
    fatal: bool,

    /// Cached from the store config
    max_payload: usize,
}

impl<C: Channel> WireSession<C> {
    /// Create a session for one peer over `channel`
    pub fn new(store: Rc<RefCell<Store>>, channel: C, caller: Caller) -> Self {
        let max_payload = store.borrow().config().max_payload;
        let events: Rc<RefCell<VecDeque<(String, String)>>> =
            Rc::new(RefCell::new(VecDeque::new()));
        let sink = Rc::clone(&events);
        let event_sink: crate::store::WatchHandler = Rc::new(move |event_path: &str, token: &str| {
            sink.borrow_mut()
                .push_back((event_path.to_string(), token.to_string()));
        });
        Self {
            store,
            channel,
            caller,
            req_buf: BytesMut::new(),
            rsp_buf: BytesMut::new(),
            rsp_pending: false,
            events,
            event_sink,
            fatal: false,
            max_payload,
        }
    }

    /// Run the cooperative processing step
    ///
    /// Invoked by the external event loop on a doorbell signal (new
    /// request bytes, or response ring space freed) and after store
    /// mutations that may have generated watch events. Never blocks; the
    /// peer is signaled only if bytes actually moved in either direction.
    pub fn process(&mut self) {
        if self.fatal {
            return;
        }
        let mut moved = false;
        loop {
            moved |= self.flush_response();
            if self.rsp_pending {
                break;
            }
            // Channel idle and no request mid-flight: deferred watch
            // events go out ahead of any new request
            if self.req_buf.is_empty() && self.stage_queued_event() {
                continue;
            }
            let (read_any, complete) = self.drain_request();
            moved |= read_any;
            if self.fatal || !complete {
                break;
            }
            self.dispatch();
        }
        if moved {
            self.channel.signal_peer();
        }
    }

    /// Clear staging state, as if the channel had just been (re)opened
    ///
    /// Open transactions and registered watches deliberately survive;
    /// queued watch events do too (they record real mutations and are
    /// redelivered once traffic resumes).
    pub fn reset(&mut self) {
        tracing::debug!("session reset for domid {}", self.caller.domid);
        self.req_buf.clear();
        self.rsp_buf.clear();
        self.rsp_pending = false;
        self.fatal = false;
    }

    /// Whether the session has hit a fatal channel error
    pub fn is_broken(&self) -> bool {
        self.fatal
    }

    /// The peer identity this session serves
    pub fn caller(&self) -> Caller {
        self.caller
    }

    /// Watch events still waiting for the channel
    pub fn queued_events(&self) -> usize {
        self.events.borrow().len()
    }

    /// The shared store handle
    pub fn store(&self) -> Rc<RefCell<Store>> {
        Rc::clone(&self.store)
    }

    /// The delivery handler identifying this session's watches
    ///
    /// Needed when watches are re-registered on snapshot restore.
    pub fn event_sink(&self) -> crate::store::WatchHandler {
        Rc::clone(&self.event_sink)
    }

    // =========================================================================
    // Ring Draining / Filling
    // =========================================================================

    /// Push staged response bytes into the ring, resuming partial
    /// transfers; returns whether any byte moved
    fn flush_response(&mut self) -> bool {
        if self.rsp_buf.is_empty() {
            return false;
        }
        let written = self.channel.write_bytes(&self.rsp_buf);
        if written > 0 {
            let _ = self.rsp_buf.split_to(written);
        }
        if self.rsp_buf.is_empty() {
            self.rsp_pending = false;
        }
        written > 0
    }

    /// Accumulate request bytes until a full frame is staged
    ///
    /// Returns (read_any, frame_complete).
    fn drain_request(&mut self) -> (bool, bool) {
        let mut read_any = false;
        loop {
            let staged = self.req_buf.len();
            let need = if staged < HEADER_SIZE {
                HEADER_SIZE - staged
            } else {
                let Some(header) = self.staged_header() else {
                    return (read_any, false);
                };
                let len = header.len as usize;
                if len > self.max_payload {
                    tracing::warn!(
                        "fatal channel error: declared payload {} exceeds maximum {}",
                        len,
                        self.max_payload
                    );
                    self.fatal = true;
                    return (read_any, false);
                }
                HEADER_SIZE + len - staged
            };
            if need == 0 {
                return (read_any, true);
            }
            let mut chunk = vec![0u8; need];
            let got = self.channel.read_bytes(&mut chunk);
            if got > 0 {
                self.req_buf.extend_from_slice(&chunk[..got]);
                read_any = true;
            }
            if got < need {
                return (read_any, false);
            }
        }
    }

    fn staged_header(&self) -> Option<MsgHeader> {
        decode_header(&self.req_buf).ok()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Execute the staged request and stage its response
    fn dispatch(&mut self) {
        let Some(header) = self.staged_header() else {
            return;
        };
        let payload = self.req_buf[HEADER_SIZE..].to_vec();
        self.req_buf.clear();

        let frame = match self.execute(header, &payload) {
            Ok(rsp_payload) => {
                tracing::trace!("op {} req {} ok", header.op, header.req_id);
                encode_frame(header.op, header.req_id, header.tx_id, &rsp_payload)
            }
            Err(err) => {
                tracing::trace!("op {} req {} -> {}", header.op, header.req_id, err.wire_name());
                encode_frame(
                    Op::Error as u32,
                    header.req_id,
                    header.tx_id,
                    &join_strings(&[err.wire_name()]),
                )
            }
        };
        self.rsp_buf.extend_from_slice(&frame);
        self.rsp_pending = true;
    }

    /// Look up and run the operation handler
    fn execute(&mut self, header: MsgHeader, payload: &[u8]) -> Result<Vec<u8>> {
        let op = Op::from_code(header.op)?;
        if op.privileged_only() && !self.caller.privileged {
            return Err(XsError::PermissionDenied);
        }
        let caller = self.caller;
        let tx = match header.tx_id {
            NO_TRANSACTION => None,
            id => Some(id),
        };
        let mut store = self.store.borrow_mut();

        match op {
            Op::Read => {
                let fields = parse_strings(payload, 1)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                store.read(caller, tx, &abs)
            }
            Op::Write => {
                let (raw_path, value) = split_field(payload)?;
                let (abs, _) = self.canonical(&store, raw_path)?;
                store.write(caller, tx, &abs, value)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::Mkdir => {
                let fields = parse_strings(payload, 1)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                store.mkdir(caller, tx, &abs)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::Rm => {
                let fields = parse_strings(payload, 1)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                store.remove(caller, tx, &abs)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::Directory => {
                let fields = parse_strings(payload, 1)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                let (names, _generation) = store.directory(caller, tx, &abs)?;
                let joined = join_strings(&names);
                if joined.len() > self.max_payload {
                    return Err(XsError::TooLarge("listing".to_string()));
                }
                Ok(joined)
            }
            Op::DirectoryPart => {
                let fields = parse_strings(payload, 2)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                let offset: usize = fields[1]
                    .parse()
                    .map_err(|_| XsError::MalformedRequest("bad offset".to_string()))?;
                let (generation, data) = store.directory_part(caller, tx, &abs, offset)?;
                let mut out = join_strings(&[generation.to_string()]);
                // Trailing empty terminator marks the end of this part
                let budget = self.max_payload.saturating_sub(out.len() + 1);
                out.extend_from_slice(&data[..data.len().min(budget)]);
                out.push(0);
                Ok(out)
            }
            Op::GetPerms => {
                let fields = parse_strings(payload, 1)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                let perms = store.get_perms(caller, tx, &abs)?;
                let formatted: Vec<String> = perms.iter().map(Perm::format).collect();
                Ok(join_strings(&formatted))
            }
            Op::SetPerms => {
                let fields = parse_string_list(payload, 2)?;
                let (abs, _) = self.canonical(&store, fields[0])?;
                let perms = fields[1..]
                    .iter()
                    .map(|f| Perm::parse(f))
                    .collect::<Result<Vec<_>>>()?;
                store.set_perms(caller, tx, &abs, perms)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::Watch => {
                let fields = parse_strings(payload, 2)?;
                let (abs, rel_offset) = self.watch_path(&store, fields[0])?;
                let handler = Rc::clone(&self.event_sink);
                store.watch(caller, &abs, rel_offset, fields[1], handler)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::Unwatch => {
                let fields = parse_strings(payload, 2)?;
                let (abs, _) = self.watch_path(&store, fields[0])?;
                store.unwatch(caller, &abs, fields[1], &self.event_sink)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::ResetWatches => {
                store.reset_watches(caller.domid);
                Ok(OK_PAYLOAD.to_vec())
            }
            Op::TransactionStart => {
                let id = store.transaction_start(caller)?;
                Ok(join_strings(&[id.to_string()]))
            }
            Op::TransactionEnd => {
                let fields = parse_strings(payload, 1)?;
                let commit = match fields[0] {
                    "T" => true,
                    "F" => false,
                    other => {
                        return Err(XsError::MalformedRequest(format!(
                            "bad commit flag {other:?}"
                        )))
                    }
                };
                let id = tx.ok_or_else(|| {
                    XsError::MalformedRequest("transaction id required".to_string())
                })?;
                store.transaction_end(caller, id, commit)?;
                Ok(OK_PAYLOAD.to_vec())
            }
            // Privileged control plumbing; domain management itself is an
            // external collaborator, so these acknowledge or decline
            Op::Debug => Ok(Vec::new()),
            Op::Introduce
            | Op::Release
            | Op::GetDomainPath
            | Op::IsDomainIntroduced
            | Op::Resume
            | Op::SetTarget => Err(XsError::NotImplemented),
            // Outbound-only frame types are invalid as requests
            Op::WatchEvent | Op::Error => Err(XsError::MalformedRequest(
                "not a request operation".to_string(),
            )),
        }
    }

    /// Canonicalize an ordinary (non-`@`) request path
    fn canonical(&self, store: &Store, raw: &str) -> Result<(String, usize)> {
        path::canonicalize(self.caller.domid, raw, store.config())
    }

    /// Canonicalize a watch path; `@`-special names pass through verbatim
    fn watch_path(&self, store: &Store, raw: &str) -> Result<(String, usize)> {
        if raw.starts_with('@') {
            Ok((raw.to_string(), 0))
        } else {
            self.canonical(store, raw)
        }
    }

    // =========================================================================
    // Watch Event Delivery
    // =========================================================================

    /// Stage the oldest deferred watch event, if any
    ///
    /// Only called with the channel idle (no response pending, no request
    /// mid-flight). An event whose path+token cannot fit one frame is
    /// dropped; that is a protocol-imposed limit.
    fn stage_queued_event(&mut self) -> bool {
        let next = self.events.borrow_mut().pop_front();
        let Some((event_path, token)) = next else {
            return false;
        };
        let payload = join_strings(&[event_path.as_str(), token.as_str()]);
        if payload.len() > self.max_payload {
            tracing::debug!("dropping oversized watch event for {}", event_path);
            return true;
        }
        let frame = encode_frame(Op::WatchEvent as u32, WATCH_EVENT_REQ_ID, 0, &payload);
        self.rsp_buf.extend_from_slice(&frame);
        self.rsp_pending = true;
        tracing::trace!("watch event staged: {} ({})", event_path, token);
        true
    }
}
