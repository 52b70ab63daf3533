//! Wire protocol layer
//!
//! Frame codec, operation set, ring transport, and the per-peer protocol
//! engine.
//!
//! ```text
//!   ┌────────────┐  request ring   ┌──────────────┐
//!   │    Peer    │ ───────────────▶│  WireSession │──▶ Store
//!   │ (guest/dom)│ ◀───────────────│   (engine)   │◀── watch events
//!   └────────────┘  response ring  └──────────────┘
//! ```
//!
//! Responses and unsolicited watch events share the response direction;
//! the session keeps them strictly ordered (at most one frame in flight).

pub mod codec;
pub mod message;
pub mod ring;
pub mod session;

pub use codec::{
    decode_header, encode_frame, encode_header, join_strings, parse_string_list, parse_strings,
    split_field, HEADER_SIZE, MAX_PAYLOAD,
};
pub use message::{MsgHeader, Op, NO_TRANSACTION, WATCH_EVENT_REQ_ID};
pub use ring::{ring_pair, Channel, PeerHandle, RingBuffer, RingChannel};
pub use session::WireSession;
