// src/notify.rs - Asynchronous notification adapter
//
// The engine never calls back into the application directly. Each session
// carries a notification template; every observed event clones the template,
// fills in the session ID and payload, and posts. Delivery order per session
// matches observation order on the I/O thread.

use crate::session::SessionId;
use bytes::Bytes;
use crossbeam_channel::Sender;
use log::debug;

/// One posted notification.
#[derive(Debug)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub kind: EventKind,
}

/// What happened on the session.
#[derive(Debug)]
pub enum EventKind {
    /// A listener accepted a child connection (posted with the child's ID).
    ClientConnected {
        server_ip: String,
        server_port: u16,
        client_ip: String,
        client_port: u16,
    },
    /// An outbound connect completed.
    Connected,
    /// A complete RTSP message arrived on an RTSP connection.
    Data(rtsp_types::Message<Vec<u8>>),
    /// An interleaved `$`-framed binary chunk arrived on an RTSP connection.
    BinaryData {
        channel: u8,
        data: Bytes,
        arrival_time_us: i64,
    },
    /// A datagram arrived: one UDP packet, or one length-prefixed TCP frame.
    /// `from` carries the source address and port for UDP only.
    Datagram {
        data: Bytes,
        arrival_time_us: i64,
        from: Option<(String, u16)>,
    },
    /// A socket operation failed. `send` tells which direction; `err` is the
    /// negative errno. The session stays in the engine until destroyed.
    Error {
        send: bool,
        err: i32,
        detail: String,
    },
}

/// Cloneable notification template supplied by the application.
///
/// Listener children inherit their parent's template.
#[derive(Clone)]
pub struct SessionNotify {
    sender: Sender<SessionEvent>,
}

impl SessionNotify {
    pub fn new(sender: Sender<SessionEvent>) -> Self {
        Self { sender }
    }

    /// Duplicate the template, fill it, post it. A hung-up receiver is not an
    /// I/O-loop error.
    pub(crate) fn post(&self, session_id: SessionId, kind: EventKind) {
        if self.sender.send(SessionEvent { session_id, kind }).is_err() {
            debug!(
                "dropping notification for session {}: receiver gone",
                session_id
            );
        }
    }
}
