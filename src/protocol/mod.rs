//! Wire protocol
//!
//! This module contains the event envelope, the framing codec for the
//! WebSocket, streaming and long-poll downstream formats, the handshake
//! payload and the reserved wire names.

pub mod codec;
pub mod event;
pub mod handshake;
pub mod names;

pub use codec::{
    StreamDecoder, decode_event, decode_longpoll_frame, decode_stream_chunk, encode_event,
    encode_longpoll_frame, encode_stream_chunk, stream_padding,
};
pub use event::{Event, ReplyEnvelope};
pub use handshake::Handshake;
