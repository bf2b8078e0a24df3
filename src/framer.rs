// src/framer.rs - Stream frame decoding
//
// Two disciplines over a stream session's inbound buffer:
// - Plain data channels: [len16 BE][payload] frames
// - RTSP connections: interleaved `$`-framed binary chunks mixed with RTSP
//   messages, the latter handed to the rtsp-types parser
//
// Both consume from the front of the buffer and leave partial frames in place
// until more bytes arrive.

use bytes::{Buf, Bytes, BytesMut};
use log::warn;
use rtsp_types::{Message, ParseError};

/// Length-prefixed frames carry a 16-bit length.
pub const MAX_LENGTH_PREFIXED_PAYLOAD: usize = u16::MAX as usize;

/// RFC 2326 interleaved binary frame marker.
pub const INTERLEAVED_MARKER: u8 = b'$';

// Some dongles send Content-Length: 17 for this SET_PARAMETER body even
// though the wire carries two more bytes. See split_rtsp_frame.
const WFD_IDR_REQUEST: &[u8] = b"wfd_idr_request\r\n";

/// Split one `[len16 BE][payload]` frame off the front of `buf`.
///
/// Returns `None` until a complete frame is buffered. A zero-length frame
/// yields an empty payload.
pub fn split_length_prefixed(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < 2 {
        return None;
    }
    let packet_size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < packet_size + 2 {
        return None;
    }

    let mut frame = buf.split_to(packet_size + 2);
    frame.advance(2);
    Some(frame.freeze())
}

/// One decoded frame from an RTSP connection's inbound buffer.
#[derive(Debug)]
pub enum RtspFrame {
    /// `$ channel len16 payload` binary chunk.
    Interleaved { channel: u8, payload: Bytes },
    /// A complete RTSP message.
    Message(Message<Vec<u8>>),
}

/// Split the next frame off the front of an RTSP connection buffer.
///
/// Returns `None` when the buffer holds no complete frame: either not enough
/// bytes yet, or leading bytes the parser rejects (the connection never
/// resynchronizes on garbage, matching sink behavior in the field).
pub fn split_rtsp_frame(buf: &mut BytesMut) -> Option<RtspFrame> {
    if buf.is_empty() {
        return None;
    }

    if buf[0] == INTERLEAVED_MARKER {
        if buf.len() < 4 {
            return None;
        }
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + length {
            return None;
        }

        let channel = buf[1];
        let mut frame = buf.split_to(4 + length);
        frame.advance(4);
        return Some(RtspFrame::Interleaved {
            channel,
            payload: frame.freeze(),
        });
    }

    match Message::parse(&buf[..]) {
        Ok((msg, mut consumed)) => {
            // The (old) dongle sends the wrong content length on the
            // SET_PARAMETER that signals a "wfd_idr_request" (17 instead of
            // 19). Swallow the stray CRLF so the next message starts clean.
            if message_body(&msg).starts_with(WFD_IDR_REQUEST)
                && buf.len() >= consumed + 2
                && &buf[consumed..consumed + 2] == b"\r\n"
            {
                consumed += 2;
            }

            buf.advance(consumed);
            Some(RtspFrame::Message(msg))
        }
        Err(ParseError::Incomplete(_)) => None,
        Err(ParseError::Error) => {
            warn!("unparseable bytes at head of RTSP connection buffer");
            None
        }
    }
}

fn message_body(msg: &Message<Vec<u8>>) -> &[u8] {
    match msg {
        Message::Request(req) => req.body().as_slice(),
        // Interleaved data never reaches the parser here; the `$` branch
        // consumes it first.
        Message::Response(resp) => resp.body().as_slice(),
        Message::Data(_) => &[],
    }
}

// ============================================================================
// Tests
// ============================================================================
