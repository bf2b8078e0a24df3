// src/reactor.rs - The I/O loop
//
// One pass per wake-up:
// 1. Snapshot interest from the live session predicates under the lock,
//    always polling the wake pipe's read end
// 2. Block in the readiness wait with the lock released
// 3. Drain the wake pipe if it fired
// 4. Re-lock and dispatch sessions in descending-ID order, consuming the
//    readiness count until exhausted
// 5. Insert children accepted during the pass
//
// Sessions accepted mid-pass are staged locally so the map is never mutated
// while it is being walked.

use crate::engine::{EngineShared, STATUS_RUN};
use crate::poller::{Event, Interest, Poller, WakePipe};
use crate::session::{Session, SessionId};
use log::{error, info};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) fn run(shared: Arc<EngineShared>, wake: Arc<WakePipe>) {
    info!("network session loop started");

    let mut poller = Poller::new();
    while shared.status.load(Ordering::Acquire) == STATUS_RUN {
        if let Err(e) = iterate(&shared, &wake, &mut poller) {
            error!("readiness wait failed: {}", e);
        }
    }

    info!("network session loop stopped");
}

/// One full snapshot/wait/dispatch pass.
fn iterate(shared: &EngineShared, wake: &WakePipe, poller: &mut Poller) -> io::Result<()> {
    poller.clear();
    poller.queue(wake.read_fd(), Interest::READABLE);

    {
        let state = shared.lock_state();
        for session in state.sessions.values() {
            let interest = Interest {
                readable: session.wants_to_read(),
                writable: session.wants_to_write(),
            };
            if !interest.is_empty() {
                poller.queue(session.raw_fd(), interest);
            }
        }
    }

    let events = poller.wait()?;
    let mut remaining = events.len();
    let ready: HashMap<RawFd, Event> = events.into_iter().map(|e| (e.fd, e)).collect();

    if ready.contains_key(&wake.read_fd()) {
        wake.drain();
        remaining -= 1;
    }

    let mut guard = shared.lock_state();
    let state = &mut *guard;
    let mut accepted: Vec<Session> = Vec::new();

    // Descending-ID order; sessions created while the lock was released are
    // simply not in the ready map yet.
    let snapshot: Vec<(SessionId, RawFd)> = state
        .sessions
        .iter()
        .rev()
        .map(|(id, session)| (*id, session.raw_fd()))
        .collect();

    for (session_id, fd) in snapshot {
        if remaining == 0 {
            break;
        }
        let Some(event) = ready.get(&fd).copied() else {
            continue;
        };
        remaining -= 1;

        let Some(session) = state.sessions.get_mut(&session_id) else {
            continue;
        };

        if event.readable && session.wants_to_read() {
            if session.is_listener() {
                if let Some(child) = accept_child(session, &mut state.next_session_id) {
                    accepted.push(child);
                }
            } else {
                session.read_more();
            }
        }

        if event.writable && session.wants_to_write() {
            session.write_more(shared.stamper.as_ref());
        }
    }

    for child in accepted {
        info!("added client session {}", child.id());
        state.sessions.insert(child.id(), child);
    }

    Ok(())
}

/// Accept one pending connection on a listener and wrap it as a connected
/// child inheriting the listener's notification template and framing mode.
fn accept_child(listener: &Session, next_session_id: &mut SessionId) -> Option<Session> {
    let (socket, peer) = loop {
        match listener.socket().accept() {
            Ok(pair) => break pair,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                error!("accept returned error: {}", e);
                return None;
            }
        }
    };

    if let Err(e) = socket.set_nonblocking(true) {
        // The child socket closes as it drops; the listener keeps serving.
        error!("unable to make client socket non-blocking: {}", e);
        return None;
    }

    if let Some(addr) = peer.as_socket() {
        info!("incoming connection from {}", addr);
    }

    let session_id = *next_session_id;
    *next_session_id += 1;

    match Session::accepted(
        session_id,
        socket,
        listener.is_rtsp_listener(),
        listener.notify().clone(),
    ) {
        Ok(child) => Some(child),
        Err(e) => {
            error!("unable to set up client session: {}", e);
            None
        }
    }
}
