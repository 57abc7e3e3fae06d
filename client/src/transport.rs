//! Channel contract consumed from the pub/sub transport.
//!
//! The shell owns the actual socket; it feeds these events into the
//! controllers and pushes whatever `take_outgoing()` yields back onto the
//! channel.

use slateboard_shared::messages::{Envelope, PresenceMeta};

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
    Broadcast(Envelope),
    PresenceSync(Vec<PresenceMeta>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}
