// src/engine.rs - Engine control surface
//
// All operations are callable from any thread: they take the engine mutex,
// mutate the session table, and poke the wake pipe so the I/O loop rebuilds
// its readiness set. Hostname resolution during session creation blocks on
// the caller's thread.

use crate::error::{Error, Result};
use crate::notify::SessionNotify;
use crate::poller::WakePipe;
use crate::reactor;
use crate::rtp::{EgressTimestamper, MpegTsRestamper};
use crate::session::{Session, SessionId, SessionState};
use crate::socket::{self, SocketMode};
use log::{error, info};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

pub(crate) const STATUS_INIT: usize = 0;
pub(crate) const STATUS_RUN: usize = 1;
pub(crate) const STATUS_END: usize = 2;

/// State shared between the control API and the I/O thread.
pub(crate) struct EngineShared {
    pub(crate) status: AtomicUsize,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) stamper: Box<dyn EgressTimestamper>,
}

impl EngineShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        // A panicking I/O thread must not wedge every control call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) struct EngineState {
    pub(crate) sessions: BTreeMap<SessionId, Session>,
    pub(crate) next_session_id: SessionId,
    wake: Option<Arc<WakePipe>>,
    worker: Option<JoinHandle<()>>,
}

impl EngineState {
    pub(crate) fn allocate_session_id(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    fn poke(&self) {
        if let Some(wake) = &self.wake {
            wake.poke();
        }
    }
}

/// The network session multiplexer.
///
/// One I/O thread drives every session; the methods here are the control
/// API, safe from any thread. Events arrive through the [`SessionNotify`]
/// template supplied per session.
///
/// # Example
///
/// ```rust,no_run
/// use wfd_session::{NetworkEngine, SessionNotify};
///
/// let engine = NetworkEngine::new();
/// engine.start()?;
///
/// let (tx, events) = crossbeam_channel::unbounded();
/// let session_id = engine.create_rtsp_server(None, 7236, SessionNotify::new(tx))?;
///
/// for event in events.iter() {
///     // ClientConnected, Data, BinaryData, Error, ...
///     println!("session {}: {:?}", event.session_id, event.kind);
/// }
/// # engine.destroy_session(session_id)?;
/// # Ok::<(), wfd_session::Error>(())
/// ```
pub struct NetworkEngine {
    shared: Arc<EngineShared>,
}

impl NetworkEngine {
    /// Engine with the default egress policy (RTP payload type 33 restamp).
    pub fn new() -> Self {
        Self::with_timestamper(Box::new(MpegTsRestamper))
    }

    /// Engine with a custom egress timestamp policy, applied to every
    /// datagram any `Datagram` session sends.
    pub fn with_timestamper(stamper: Box<dyn EgressTimestamper>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                status: AtomicUsize::new(STATUS_INIT),
                state: Mutex::new(EngineState {
                    sessions: BTreeMap::new(),
                    next_session_id: 1,
                    wake: None,
                    worker: None,
                }),
                stamper,
            }),
        }
    }

    /// Spawn the I/O thread. A second call on a running engine is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.worker.is_some() {
            return Ok(());
        }

        let wake = Arc::new(WakePipe::new()?);
        state.wake = Some(wake.clone());
        self.shared.status.store(STATUS_RUN, Ordering::Release);

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("wfd-session-io".to_string())
            .spawn(move || reactor::run(shared, wake));

        match spawned {
            Ok(handle) => {
                state.worker = Some(handle);
                info!("network session engine started");
                Ok(())
            }
            Err(e) => {
                state.wake = None;
                self.shared.status.store(STATUS_INIT, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Request loop exit, wake it, and join. A no-op when not running.
    /// Live sessions stay in the engine and close when it is dropped.
    pub fn stop(&self) -> Result<()> {
        let (worker, wake) = {
            let mut state = self.shared.lock_state();
            match state.worker.take() {
                Some(worker) => (worker, state.wake.take()),
                None => return Ok(()),
            }
        };

        self.shared.status.store(STATUS_END, Ordering::Release);
        if let Some(wake) = &wake {
            wake.poke();
        }
        if worker.join().is_err() {
            error!("network session worker panicked");
        }
        info!("network session engine stopped");
        Ok(())
    }

    /// Outbound RTSP control connection to `host:port`. The session reports
    /// `Connected` (or `Error` with `send=true`) once the connect resolves.
    pub fn create_rtsp_client(
        &self,
        host: &str,
        port: u16,
        notify: SessionNotify,
    ) -> Result<SessionId> {
        self.create_client_or_server(SocketMode::RtspClient, None, 0, Some((host, port)), notify)
    }

    /// Listening RTSP endpoint on `local_addr:port` (wildcard when no
    /// address is given). Accepted children inherit `notify` and announce
    /// themselves with `ClientConnected`.
    pub fn create_rtsp_server(
        &self,
        local_addr: Option<Ipv4Addr>,
        port: u16,
        notify: SessionNotify,
    ) -> Result<SessionId> {
        self.create_client_or_server(SocketMode::RtspServer, local_addr, port, None, notify)
    }

    /// UDP endpoint bound to `local_port`, optionally connected to a default
    /// peer so plain `send_request` bytes have a destination.
    pub fn create_udp_session(
        &self,
        local_port: u16,
        remote: Option<(&str, u16)>,
        notify: SessionNotify,
    ) -> Result<SessionId> {
        self.create_client_or_server(SocketMode::Udp, None, local_port, remote, notify)
    }

    /// Listening endpoint for length-prefixed TCP datagram channels.
    pub fn create_tcp_datagram_server(
        &self,
        local_addr: Option<Ipv4Addr>,
        port: u16,
        notify: SessionNotify,
    ) -> Result<SessionId> {
        self.create_client_or_server(SocketMode::TcpDatagramPassive, local_addr, port, None, notify)
    }

    /// Outbound length-prefixed TCP datagram channel to `host:port`.
    pub fn create_tcp_datagram_client(
        &self,
        host: &str,
        port: u16,
        notify: SessionNotify,
    ) -> Result<SessionId> {
        self.create_client_or_server(
            SocketMode::TcpDatagramActive,
            None,
            0,
            Some((host, port)),
            notify,
        )
    }

    /// Set (or replace) the default peer of an existing UDP session.
    pub fn connect_udp_session(&self, session_id: SessionId, host: &str, port: u16) -> Result<()> {
        let state = self.shared.lock_state();
        let session = state
            .sessions
            .get(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        let peer = socket::resolve_ipv4(host, port)?;
        session.socket().connect(&peer.into())?;
        state.poke();
        Ok(())
    }

    /// Queue bytes for transmission on a session.
    ///
    /// Datagram sessions send the bytes as one datagram; connected
    /// length-prefixed channels frame them with a 16-bit length (payloads
    /// above 65535 bytes are rejected); RTSP connections send them verbatim.
    /// Transmission happens on the I/O thread as the socket allows; failures
    /// there surface as `Error` notifications, not here.
    pub fn send_request(&self, session_id: SessionId, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock_state();
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::SessionNotFound(session_id))?;

        let result = session.send_request(data);
        state.poke();
        result
    }

    /// Remove the session and close its socket. Bytes still queued may or
    /// may not have been transmitted.
    pub fn destroy_session(&self, session_id: SessionId) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.sessions.remove(&session_id).is_none() {
            return Err(Error::SessionNotFound(session_id));
        }
        state.poke();
        Ok(())
    }

    fn create_client_or_server(
        &self,
        mode: SocketMode,
        local_addr: Option<Ipv4Addr>,
        local_port: u16,
        remote: Option<(&str, u16)>,
        notify: SessionNotify,
    ) -> Result<SessionId> {
        let mut state = self.shared.lock_state();

        // Any factory failure propagates before a session exists.
        let socket = socket::open_session_socket(mode, local_addr, local_port, remote)?;

        let (session_state, is_rtsp) = match mode {
            SocketMode::RtspClient => (SessionState::Connecting, true),
            SocketMode::RtspServer => (SessionState::ListeningRtsp, false),
            SocketMode::TcpDatagramActive => (SessionState::Connecting, false),
            SocketMode::TcpDatagramPassive => (SessionState::ListeningTcpDatagrams, false),
            SocketMode::Udp => (SessionState::Datagram, false),
        };

        let session_id = state.allocate_session_id();
        let session = Session::new(session_id, session_state, is_rtsp, socket, notify);
        state.sessions.insert(session_id, session);
        state.poke();

        Ok(session_id)
    }
}

impl Default for NetworkEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NetworkEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================
