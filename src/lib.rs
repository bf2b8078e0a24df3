//! **wfd-session** is the network session multiplexer at the heart of a
//! Wi-Fi Display (Miracast) stack: RTSP control connections, UDP media
//! channels, and TCP-framed data channels managed by a single I/O thread and
//! surfaced to the application as asynchronous notifications.
//!
//! # Architecture
//!
//! One readiness loop drives every session. Control operations are safe from
//! any thread: they mutate the session table under the engine mutex, then
//! wake the loop through a self-pipe so it re-derives its interest set.
//!
//! ## Key components
//!
//! - [`NetworkEngine`]: the control API (create, connect, send, destroy)
//! - `Session`: per-endpoint state machine, buffers, and framing mode
//! - `Poller`: poll(2) readiness wait, rebuilt from live predicates per pass
//! - [`SessionNotify`]: clone-per-event notification template
//! - [`EgressTimestamper`]: outbound datagram rewrite policy (RTP send-time
//!   stamping by default)
//!
//! ## Session kinds
//!
//! | Created via | Socket | Framing |
//! |-------------|--------|---------|
//! | `create_rtsp_client` / `create_rtsp_server` | TCP | RTSP messages + `$`-interleaved binary channels |
//! | `create_tcp_datagram_client` / `create_tcp_datagram_server` | TCP | `[len16 BE][payload]` datagram frames |
//! | `create_udp_session` | UDP | one datagram per packet, ≤ 1500 bytes |
//!
//! Listeners spawn child sessions on accept; children inherit the parent's
//! notification template and framing mode and announce themselves with a
//! `ClientConnected` event carrying both endpoint addresses.
//!
//! ## Error model
//!
//! Setup failures (resolution, bind, listen, connect submission) come back
//! synchronously from the control API and no session is created. Failures on
//! live sessions arrive as [`EventKind::Error`] notifications with the
//! negative errno; the failed direction goes sticky and the application
//! decides when to destroy the session.
//!
//! # Example
//!
//! ```rust,no_run
//! use wfd_session::{EventKind, NetworkEngine, SessionNotify};
//!
//! let engine = NetworkEngine::new();
//! engine.start()?;
//!
//! let (tx, events) = crossbeam_channel::unbounded();
//! engine.create_rtsp_server(None, 7236, SessionNotify::new(tx))?;
//!
//! for event in events.iter() {
//!     match event.kind {
//!         EventKind::ClientConnected { client_ip, client_port, .. } => {
//!             println!("sink at {}:{}", client_ip, client_port);
//!         }
//!         EventKind::Data(message) => {
//!             // drive the RTSP state machine
//!             let _ = message;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok::<(), wfd_session::Error>(())
//! ```

mod clock;
mod engine;
pub mod error;
mod framer;
mod notify;
mod poller;
mod reactor;
mod rtp;
mod session;
mod socket;

pub use engine::NetworkEngine;
pub use error::{Error, Result};
pub use notify::{EventKind, SessionEvent, SessionNotify};
pub use rtp::{EgressTimestamper, MpegTsRestamper, RTP_PAYLOAD_TYPE_MPEG_TS};
pub use session::{SessionId, MAX_UDP_PAYLOAD};
