//! Bounded byte rings and the channel seam
//!
//! The transport the protocol engine drains and fills is a pair of
//! fixed-capacity circular byte buffers with independent producer and
//! consumer positions, one per direction. How two parties come to share
//! them (and the doorbell that wakes the peer) is an external
//! collaborator's concern; the engine only sees the `Channel` trait.
//!
//! `ring_pair` builds an in-process loopback channel over two `RingBuffer`s
//! for tests and the demo shell.

use std::cell::RefCell;
use std::rc::Rc;

/// Transport seam consumed by the wire protocol engine
pub trait Channel {
    /// Copy available request bytes into `buf`, returning the count
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;

    /// Copy response bytes out of `bytes` as space allows, returning the
    /// count accepted
    fn write_bytes(&mut self, bytes: &[u8]) -> usize;

    /// Ring the peer's doorbell
    fn signal_peer(&mut self);
}

/// Fixed-capacity circular byte buffer
///
/// Free-running positions; `prod - cons` never exceeds the capacity.
pub struct RingBuffer {
    buf: Vec<u8>,
    cons: usize,
    prod: usize,
}

impl RingBuffer {
    /// Create a ring with the given capacity (must be non-zero)
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity],
            cons: 0,
            prod: 0,
        }
    }

    /// Bytes available to read
    pub fn len(&self) -> usize {
        self.prod - self.cons
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of free space available to write
    pub fn free(&self) -> usize {
        self.buf.len() - self.len()
    }

    /// Copy in as much of `bytes` as fits, honoring wraparound
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.free());
        let cap = self.buf.len();
        for (i, byte) in bytes[..count].iter().enumerate() {
            self.buf[(self.prod + i) % cap] = *byte;
        }
        self.prod += count;
        count
    }

    /// Copy out up to `buf.len()` bytes, honoring wraparound
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.len());
        let cap = self.buf.len();
        for (i, slot) in buf[..count].iter_mut().enumerate() {
            *slot = self.buf[(self.cons + i) % cap];
        }
        self.cons += count;
        count
    }
}

// =============================================================================
// Loopback Channel
// =============================================================================

/// The engine-side endpoint of an in-process ring pair
pub struct RingChannel {
    req: Rc<RefCell<RingBuffer>>,
    rsp: Rc<RefCell<RingBuffer>>,
    signals: Rc<RefCell<u64>>,
}

impl Channel for RingChannel {
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        self.req.borrow_mut().read(buf)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.rsp.borrow_mut().write(bytes)
    }

    fn signal_peer(&mut self) {
        *self.signals.borrow_mut() += 1;
    }
}

/// The peer-side endpoint: what a guest client library would hold
pub struct PeerHandle {
    req: Rc<RefCell<RingBuffer>>,
    rsp: Rc<RefCell<RingBuffer>>,
    signals: Rc<RefCell<u64>>,
}

impl PeerHandle {
    /// Push request bytes toward the engine; returns the count accepted
    pub fn push_request(&self, bytes: &[u8]) -> usize {
        self.req.borrow_mut().write(bytes)
    }

    /// Pull staged response bytes; returns the count copied
    pub fn pull_response(&self, buf: &mut [u8]) -> usize {
        self.rsp.borrow_mut().read(buf)
    }

    /// Pull everything currently staged in the response ring
    pub fn drain_response(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = self.pull_response(&mut chunk);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        out
    }

    /// Number of doorbell signals the engine has raised
    pub fn signal_count(&self) -> u64 {
        *self.signals.borrow()
    }

    /// Bytes waiting unread in the request ring
    pub fn pending_request_bytes(&self) -> usize {
        self.req.borrow().len()
    }
}

/// Build a loopback ring pair with the given per-direction capacity
pub fn ring_pair(capacity: usize) -> (RingChannel, PeerHandle) {
    let req = Rc::new(RefCell::new(RingBuffer::with_capacity(capacity)));
    let rsp = Rc::new(RefCell::new(RingBuffer::with_capacity(capacity)));
    let signals = Rc::new(RefCell::new(0));
    let engine = RingChannel {
        req: Rc::clone(&req),
        rsp: Rc::clone(&rsp),
        signals: Rc::clone(&signals),
    };
    let peer = PeerHandle { req, rsp, signals };
    (engine, peer)
}
