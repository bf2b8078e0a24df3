// src/session.rs - Per-endpoint session state machine
//
// A session owns one socket plus the buffers and framing mode layered on it:
// - Stream sessions: inbound byte buffer decoded per framing mode, outbound
//   byte buffer flushed on write-readiness
// - Datagram sessions: outbound datagram queue, drained head-first with the
//   RTP egress stamp applied
// - Listeners: no buffers; read-readiness means "accept a child"
//
// A failed direction goes sticky: the session stops asking for that
// readiness and waits for the application to destroy it.

use crate::clock::monotonic_micros;
use crate::error::{Error, Result};
use crate::framer::{self, RtspFrame, MAX_LENGTH_PREFIXED_PAYLOAD};
use crate::notify::{EventKind, SessionNotify};
use crate::rtp::EgressTimestamper;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, info};
use socket2::Socket;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, RawFd};

/// Engine-unique session identifier. Monotonically increasing from 1, never
/// reused within a process lifetime.
pub type SessionId = u32;

/// Largest UDP payload the engine delivers.
pub const MAX_UDP_PAYLOAD: usize = 1500;

const STREAM_READ_CHUNK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Outbound TCP connect in flight; completion arrives as write-readiness.
    Connecting,
    /// Established stream; framing mode chosen by `is_rtsp_connection`.
    Connected,
    /// TCP listener spawning RTSP children.
    ListeningRtsp,
    /// TCP listener spawning length-prefixed datagram children.
    ListeningTcpDatagrams,
    /// UDP endpoint.
    Datagram,
}

pub(crate) struct Session {
    id: SessionId,
    state: SessionState,
    is_rtsp_connection: bool,
    socket: Socket,
    notify: SessionNotify,
    saw_receive_failure: bool,
    saw_send_failure: bool,

    in_buffer: BytesMut,

    // for TCP / stream data
    out_buffer: BytesMut,

    // for UDP / datagrams
    out_datagrams: VecDeque<BytesMut>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        state: SessionState,
        is_rtsp_connection: bool,
        socket: Socket,
        notify: SessionNotify,
    ) -> Self {
        Self {
            id,
            state,
            is_rtsp_connection,
            socket,
            notify,
            saw_receive_failure: false,
            saw_send_failure: false,
            in_buffer: BytesMut::new(),
            out_buffer: BytesMut::new(),
            out_datagrams: VecDeque::new(),
        }
    }

    /// Wrap a freshly accepted child socket and announce it.
    ///
    /// The `ClientConnected` notification goes out before the session joins
    /// the engine map, carrying both endpoint addresses as dotted quads.
    pub(crate) fn accepted(
        id: SessionId,
        socket: Socket,
        is_rtsp_connection: bool,
        notify: SessionNotify,
    ) -> io::Result<Self> {
        let local = socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-inet local address"))?;
        let remote = socket
            .peer_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-inet peer address"))?;

        let session = Self::new(id, SessionState::Connected, is_rtsp_connection, socket, notify);
        session.notify.post(
            id,
            EventKind::ClientConnected {
                server_ip: local.ip().to_string(),
                server_port: local.port(),
                client_ip: remote.ip().to_string(),
                client_port: remote.port(),
            },
        );
        Ok(session)
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub(crate) fn notify(&self) -> &SessionNotify {
        &self.notify
    }

    pub(crate) fn is_listener(&self) -> bool {
        matches!(
            self.state,
            SessionState::ListeningRtsp | SessionState::ListeningTcpDatagrams
        )
    }

    pub(crate) fn is_rtsp_listener(&self) -> bool {
        self.state == SessionState::ListeningRtsp
    }

    // ------------------------------------------------------------------
    // Readiness predicates
    // ------------------------------------------------------------------

    pub(crate) fn wants_to_read(&self) -> bool {
        !self.saw_receive_failure && self.state != SessionState::Connecting
    }

    pub(crate) fn wants_to_write(&self) -> bool {
        !self.saw_send_failure
            && (self.state == SessionState::Connecting
                || (self.state == SessionState::Connected && !self.out_buffer.is_empty())
                || (self.state == SessionState::Datagram && !self.out_datagrams.is_empty()))
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    pub(crate) fn read_more(&mut self) {
        if self.state == SessionState::Datagram {
            self.read_datagrams();
        } else {
            self.read_stream();
        }
    }

    /// Drain queued datagrams until the socket runs dry.
    fn read_datagrams(&mut self) {
        loop {
            let mut scratch = [MaybeUninit::<u8>::uninit(); MAX_UDP_PAYLOAD];

            let res = loop {
                match self.socket.recv_from(&mut scratch) {
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other,
                }
            };

            match res {
                Ok((0, _)) => {
                    self.record_receive_failure(-libc::ECONNRESET, "Recvfrom failed.");
                    return;
                }
                Ok((n, from)) => {
                    // SAFETY: recv_from initialized the first n bytes of scratch.
                    let data = unsafe {
                        std::slice::from_raw_parts(scratch.as_ptr() as *const u8, n)
                    };
                    let from = from.as_socket().map(|a| (a.ip().to_string(), a.port()));
                    self.notify.post(
                        self.id,
                        EventKind::Datagram {
                            data: Bytes::copy_from_slice(data),
                            arrival_time_us: monotonic_micros(),
                            from,
                        },
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    self.record_receive_failure(neg_errno(&e), "Recvfrom failed.");
                    return;
                }
            }
        }
    }

    /// One bounded read, then decode whatever frames are now complete.
    ///
    /// Decoded frames are delivered even when the read itself failed; the
    /// error notification follows them, preserving observation order.
    fn read_stream(&mut self) {
        let mut tmp = [0u8; STREAM_READ_CHUNK];

        let res = loop {
            match (&self.socket).read(&mut tmp) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        let mut failure: Option<i32> = None;
        match res {
            Ok(0) => failure = Some(-libc::ECONNRESET), // connection reset
            Ok(n) => self.in_buffer.extend_from_slice(&tmp[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => failure = Some(neg_errno(&e)),
        }

        if self.is_rtsp_connection {
            self.drain_rtsp_frames();
        } else {
            self.drain_length_prefixed_frames();
        }

        if let Some(err) = failure {
            self.record_receive_failure(err, "Recv failed.");
        }
    }

    fn drain_length_prefixed_frames(&mut self) {
        while let Some(payload) = framer::split_length_prefixed(&mut self.in_buffer) {
            self.notify.post(
                self.id,
                EventKind::Datagram {
                    data: payload,
                    arrival_time_us: monotonic_micros(),
                    from: None,
                },
            );
        }
    }

    fn drain_rtsp_frames(&mut self) {
        while let Some(frame) = framer::split_rtsp_frame(&mut self.in_buffer) {
            match frame {
                RtspFrame::Interleaved { channel, payload } => {
                    self.notify.post(
                        self.id,
                        EventKind::BinaryData {
                            channel,
                            data: payload,
                            arrival_time_us: monotonic_micros(),
                        },
                    );
                }
                RtspFrame::Message(msg) => {
                    self.notify.post(self.id, EventKind::Data(msg));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    pub(crate) fn write_more(&mut self, stamper: &dyn EgressTimestamper) {
        match self.state {
            SessionState::Datagram => self.flush_datagrams(stamper),
            SessionState::Connecting => self.finish_connect(),
            SessionState::Connected => self.flush_stream(),
            _ => {}
        }
    }

    /// Write-readiness on a connecting socket: the connect finished, one way
    /// or the other. SO_ERROR says which.
    fn finish_connect(&mut self) {
        let pending = match self.socket.take_error() {
            Ok(pending) => pending,
            Err(e) => Some(e),
        };

        match pending {
            None => {
                self.state = SessionState::Connected;
                self.notify.post(self.id, EventKind::Connected);
            }
            Some(e) => {
                self.saw_send_failure = true;
                self.notify_error(true, neg_errno(&e), "Connection failed");
            }
        }
    }

    fn flush_datagrams(&mut self, stamper: &dyn EgressTimestamper) {
        while let Some(datagram) = self.out_datagrams.front_mut() {
            // Stamped on every attempt so a datagram held back by EAGAIN
            // still leaves with its actual send time.
            stamper.restamp(&mut datagram[..], monotonic_micros());

            let res = loop {
                match self.socket.send(&datagram[..]) {
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other,
                }
            };

            match res {
                Ok(0) => {
                    self.record_send_failure(-libc::ECONNRESET, "Send datagram failed.");
                    return;
                }
                Ok(_) => {
                    self.out_datagrams.pop_front();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    info!("{} datagrams remain queued.", self.out_datagrams.len());
                    return;
                }
                Err(e) => {
                    self.record_send_failure(neg_errno(&e), "Send datagram failed.");
                    return;
                }
            }
        }
    }

    /// One send of the whole outbound buffer; whatever the kernel takes is
    /// erased from the front.
    fn flush_stream(&mut self) {
        if self.out_buffer.is_empty() {
            return;
        }

        let res = loop {
            match self.socket.send(&self.out_buffer[..]) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match res {
            Ok(0) => self.record_send_failure(-libc::ECONNRESET, "Send failed."),
            Ok(n) => self.out_buffer.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.record_send_failure(neg_errno(&e), "Send failed."),
        }
    }

    // ------------------------------------------------------------------
    // Outbound enqueue
    // ------------------------------------------------------------------

    /// Queue application bytes for transmission.
    ///
    /// Datagram sessions take the bytes as one datagram. Connected plain
    /// streams get a 16-bit big-endian length prefix (payloads above 65535
    /// bytes cannot be framed); RTSP connections take the bytes verbatim,
    /// the caller having supplied a complete message.
    pub(crate) fn send_request(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Datagram => {
                self.out_datagrams.push_back(BytesMut::from(data));
                Ok(())
            }
            SessionState::Connected => {
                if !self.is_rtsp_connection {
                    if data.len() > MAX_LENGTH_PREFIXED_PAYLOAD {
                        return Err(Error::PayloadTooLarge(data.len()));
                    }
                    self.out_buffer.put_u16(data.len() as u16);
                }
                self.out_buffer.extend_from_slice(data);
                Ok(())
            }
            _ => Err(Error::SessionNotReady(self.id)),
        }
    }

    // ------------------------------------------------------------------
    // Failure accounting
    // ------------------------------------------------------------------

    fn record_receive_failure(&mut self, err: i32, detail: &str) {
        self.saw_receive_failure = true;
        self.notify_error(false, err, detail);
    }

    fn record_send_failure(&mut self, err: i32, detail: &str) {
        self.saw_send_failure = true;
        self.notify_error(true, err, detail);
    }

    fn notify_error(&self, send: bool, err: i32, detail: &str) {
        self.notify.post(
            self.id,
            EventKind::Error {
                send,
                err,
                detail: detail.to_string(),
            },
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The owned socket closes with the session, exactly once.
        debug!("session {} gone", self.id);
    }
}

fn neg_errno(e: &io::Error) -> i32 {
    e.raw_os_error().map(|code| -code).unwrap_or(-libc::EIO)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::SessionEvent;
    use crate::poller::{Interest, Poller};
    use crate::rtp::MpegTsRestamper;
    use crate::socket::{open_session_socket, SocketMode};
    use crossbeam_channel::Receiver;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream, UdpSocket};
    use std::time::Duration;

    fn notify_pair() -> (SessionNotify, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (SessionNotify::new(tx), rx)
    }

    /// Connected non-blocking stream session + the peer's blocking socket.
    fn stream_session(
        id: SessionId,
        is_rtsp: bool,
    ) -> (Session, TcpStream, Receiver<SessionEvent>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get address");

        let peer = TcpStream::connect(addr).expect("Failed to connect");
        let (server, _) = listener.accept().expect("Failed to accept");
        server.set_nonblocking(true).expect("Failed to set nonblocking");

        let (notify, events) = notify_pair();
        let session = Session::new(
            id,
            SessionState::Connected,
            is_rtsp,
            Socket::from(server),
            notify,
        );
        (session, peer, events)
    }

    fn udp_session(id: SessionId, peer: &UdpSocket) -> (Session, Receiver<SessionEvent>) {
        let port = peer.local_addr().unwrap().port();
        let socket = open_session_socket(SocketMode::Udp, None, 0, Some(("127.0.0.1", port)))
            .expect("Failed to open udp socket");
        let (notify, events) = notify_pair();
        (
            Session::new(id, SessionState::Datagram, false, socket, notify),
            events,
        )
    }

    #[test]
    fn test_predicates_by_state() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind");
        let (mut session, _events) = udp_session(1, &peer);

        // Idle datagram session: read yes, write only with queued data.
        assert!(session.wants_to_read());
        assert!(!session.wants_to_write());
        session.send_request(b"x").expect("Failed to enqueue");
        assert!(session.wants_to_write());
    }

    #[test]
    fn test_connecting_wants_write_only() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let port = listener.local_addr().unwrap().port();
        let socket = open_session_socket(SocketMode::RtspClient, None, 0, Some(("127.0.0.1", port)))
            .expect("Failed to open client socket");

        let (notify, _events) = notify_pair();
        let session = Session::new(1, SessionState::Connecting, true, socket, notify);
        assert!(!session.wants_to_read());
        assert!(session.wants_to_write());
    }

    #[test]
    fn test_connect_completion_transitions_to_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let port = listener.local_addr().unwrap().port();
        let socket = open_session_socket(SocketMode::RtspClient, None, 0, Some(("127.0.0.1", port)))
            .expect("Failed to open client socket");

        let (notify, events) = notify_pair();
        let mut session = Session::new(1, SessionState::Connecting, true, socket, notify);

        // Wait for the connect to complete as write-readiness.
        let mut poller = Poller::new();
        poller.queue(
            session.raw_fd(),
            Interest {
                readable: false,
                writable: true,
            },
        );
        poller.wait().expect("Failed to poll");

        session.write_more(&MpegTsRestamper);

        let ev = events.try_recv().expect("No event posted");
        assert!(matches!(ev.kind, EventKind::Connected));
        // Now a plain connected session: reads wanted, no pending writes.
        assert!(session.wants_to_read());
        assert!(!session.wants_to_write());
    }

    #[test]
    fn test_send_request_length_prefix_framing() {
        let (mut session, mut peer, _events) = stream_session(1, false);

        session.send_request(b"hello").expect("Failed to enqueue");
        session.write_more(&MpegTsRestamper);

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut wire = [0u8; 7];
        peer.read_exact(&mut wire).expect("Failed to read wire bytes");
        assert_eq!(&wire, b"\x00\x05hello");
    }

    #[test]
    fn test_send_request_zero_length_payload() {
        let (mut session, mut peer, _events) = stream_session(1, false);

        session.send_request(b"").expect("Failed to enqueue");
        session.send_request(b"after").expect("Failed to enqueue");
        session.write_more(&MpegTsRestamper);

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut wire = [0u8; 9];
        peer.read_exact(&mut wire).expect("Failed to read wire bytes");
        assert_eq!(&wire, b"\x00\x00\x00\x05after");
    }

    #[test]
    fn test_send_request_rtsp_verbatim() {
        let (mut session, mut peer, _events) = stream_session(1, true);

        session
            .send_request(b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n")
            .expect("Failed to enqueue");
        session.write_more(&MpegTsRestamper);

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut wire = [0u8; 31];
        peer.read_exact(&mut wire).expect("Failed to read wire bytes");
        // No length prefix on RTSP connections.
        assert_eq!(&wire[..], b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    }

    #[test]
    fn test_send_request_payload_size_limit() {
        let (mut session, _peer, _events) = stream_session(1, false);

        let max = vec![0u8; 65535];
        assert!(session.send_request(&max).is_ok());

        let too_big = vec![0u8; 65536];
        assert!(matches!(
            session.send_request(&too_big),
            Err(Error::PayloadTooLarge(65536))
        ));
    }

    #[test]
    fn test_send_request_while_connecting_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let port = listener.local_addr().unwrap().port();
        let socket = open_session_socket(SocketMode::RtspClient, None, 0, Some(("127.0.0.1", port)))
            .expect("Failed to open client socket");

        let (notify, _events) = notify_pair();
        let mut session = Session::new(3, SessionState::Connecting, true, socket, notify);
        assert!(matches!(
            session.send_request(b"x"),
            Err(Error::SessionNotReady(3))
        ));
    }

    #[test]
    fn test_stream_read_length_prefixed_frames_in_order() {
        let (mut session, mut peer, events) = stream_session(1, false);

        peer.write_all(b"\x00\x03one\x00\x03two").expect("Failed to write");
        // Give the kernel a moment to move the bytes across loopback.
        std::thread::sleep(Duration::from_millis(50));
        session.read_more();

        for expected in [b"one", b"two"] {
            match events.recv_timeout(Duration::from_secs(5)) {
                Ok(SessionEvent {
                    kind: EventKind::Datagram { data, from, .. },
                    ..
                }) => {
                    assert_eq!(&data[..], expected);
                    assert!(from.is_none());
                }
                other => panic!("Expected datagram event, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_stream_read_rtsp_binary_and_message() {
        let (mut session, mut peer, events) = stream_session(1, true);

        peer.write_all(b"$\x02\x00\x04ABCDOPTIONS * RTSP/1.0\r\nCSeq: 9\r\n\r\n")
            .expect("Failed to write");
        std::thread::sleep(Duration::from_millis(50));
        session.read_more();

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                kind:
                    EventKind::BinaryData {
                        channel,
                        data,
                        arrival_time_us,
                    },
                ..
            }) => {
                assert_eq!(channel, 2);
                assert_eq!(&data[..], b"ABCD");
                assert!(arrival_time_us >= 0);
            }
            other => panic!("Expected binary data event, got {:?}", other),
        }
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                kind: EventKind::Data(rtsp_types::Message::Request(req)),
                ..
            }) => {
                assert_eq!(req.method(), rtsp_types::Method::Options);
            }
            other => panic!("Expected parsed message event, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_peer_close_is_connection_reset() {
        let (mut session, peer, events) = stream_session(1, false);

        drop(peer);
        std::thread::sleep(Duration::from_millis(50));
        session.read_more();

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                kind: EventKind::Error { send, err, .. },
                ..
            }) => {
                assert!(!send);
                assert_eq!(err, -libc::ECONNRESET);
            }
            other => panic!("Expected error event, got {:?}", other),
        }
        // Sticky: the session no longer asks for read-readiness.
        assert!(!session.wants_to_read());
    }

    #[test]
    fn test_datagram_read_tags_source_and_time() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind peer");
        let (mut session, events) = udp_session(1, &peer);

        let local = session
            .socket()
            .local_addr()
            .unwrap()
            .as_socket()
            .expect("Not an inet addr");
        peer.send_to(b"ping", local).expect("Failed to send");
        std::thread::sleep(Duration::from_millis(50));
        session.read_more();

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                kind:
                    EventKind::Datagram {
                        data,
                        arrival_time_us,
                        from: Some((from_addr, from_port)),
                    },
                ..
            }) => {
                assert_eq!(&data[..], b"ping");
                assert!(arrival_time_us >= 0);
                assert_eq!(from_addr, "127.0.0.1");
                assert_eq!(from_port, peer.local_addr().unwrap().port());
            }
            other => panic!("Expected datagram event, got {:?}", other),
        }
    }

    #[test]
    fn test_datagram_read_max_size_intact() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind peer");
        let (mut session, events) = udp_session(1, &peer);

        let local = session
            .socket()
            .local_addr()
            .unwrap()
            .as_socket()
            .expect("Not an inet addr");
        let payload: Vec<u8> = (0..MAX_UDP_PAYLOAD).map(|i| i as u8).collect();
        peer.send_to(&payload, local).expect("Failed to send");
        std::thread::sleep(Duration::from_millis(50));
        session.read_more();

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                kind: EventKind::Datagram { data, .. },
                ..
            }) => assert_eq!(&data[..], &payload[..]),
            other => panic!("Expected datagram event, got {:?}", other),
        }
    }

    #[test]
    fn test_datagram_flush_delivers_queue_in_order() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind peer");
        let (mut session, _events) = udp_session(1, &peer);

        session.send_request(b"first").expect("Failed to enqueue");
        session.send_request(b"second").expect("Failed to enqueue");
        session.write_more(&MpegTsRestamper);
        assert!(!session.wants_to_write());

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 64];
        let n = peer.recv(&mut buf).expect("Failed to receive");
        assert_eq!(&buf[..n], b"first");
        let n = peer.recv(&mut buf).expect("Failed to receive");
        assert_eq!(&buf[..n], b"second");
    }

    #[test]
    fn test_datagram_send_failure_is_sticky() {
        // Unconnected UDP socket: send() has no destination and fails, which
        // must set the sticky send-failure flag and post an error.
        let socket =
            open_session_socket(SocketMode::Udp, None, 0, None).expect("Failed to open socket");
        let (notify, events) = notify_pair();
        let mut session = Session::new(1, SessionState::Datagram, false, socket, notify);

        session.send_request(b"x").expect("Failed to enqueue");
        assert!(session.wants_to_write());
        session.write_more(&MpegTsRestamper);

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                kind: EventKind::Error { send, err, .. },
                ..
            }) => {
                assert!(send);
                assert!(err < 0);
            }
            other => panic!("Expected error event, got {:?}", other),
        }
        assert!(!session.wants_to_write());
    }

    #[test]
    fn test_accepted_posts_client_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get address");

        let client = TcpStream::connect(addr).expect("Failed to connect");
        let (server, _) = listener.accept().expect("Failed to accept");
        server.set_nonblocking(true).expect("Failed to set nonblocking");

        let (notify, events) = notify_pair();
        let session = Session::accepted(42, Socket::from(server), true, notify)
            .expect("Failed to wrap accepted socket");

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent {
                session_id,
                kind:
                    EventKind::ClientConnected {
                        server_ip,
                        server_port,
                        client_ip,
                        client_port,
                    },
            }) => {
                assert_eq!(session_id, 42);
                assert_eq!(server_ip, "127.0.0.1");
                assert_eq!(server_port, addr.port());
                assert_eq!(client_ip, "127.0.0.1");
                assert_eq!(client_port, client.local_addr().unwrap().port());
            }
            other => panic!("Expected client-connected event, got {:?}", other),
        }
        assert!(session.wants_to_read());
    }
}
