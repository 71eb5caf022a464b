//! Visual-channel protocol: message schema and frame codec.
//!
//! The channel is a pair of screens facing a pair of cameras; each write
//! replaces the frame a screen is showing, and the peer's camera re-decodes
//! whatever is displayed, as often as it likes. Everything above that is a
//! receiver-driven pull loop:
//!
//! ```text
//! sender                         receiver
//!   | HELLO(file metadata)  -->    |
//!   |                <-- ACK      |
//!   | ACK -->                     |
//!   |                <-- PULL(0)  |
//!   | DATA(0, next=1) -->         |
//!   |                <-- PULL(1)  |
//!   | ...                         |
//!   | DATA(n-1, next=-1) -->      |   assemble + verify
//! ```
//!
//! Loss needs no retransmission logic: a frame stays displayed until the
//! engine writes the next one, so the peer simply keeps scanning until the
//! expected answer appears.

pub mod codec;
pub mod message;

pub use codec::{decode, encode};
pub use message::{
    ErrorKind, Message, MessageTag, Party, NO_MORE_CHUNKS, PROTOCOL_VERSION,
};
