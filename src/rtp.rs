// src/rtp.rs - RTP egress timestamp policy
//
// Sender-side RTP packetizers stamp media time; the wire wants actual send
// time so receiver jitter buffers see network latency, not encode latency.
// The rewrite is a policy on the engine so other payload types can opt in.

use log::debug;

/// RTP payload type for MPEG2 transport streams.
pub const RTP_PAYLOAD_TYPE_MPEG_TS: u8 = 33;

/// Rewrites the timestamp of an outbound datagram just before it hits the
/// wire. Called for every datagram a `Datagram` session sends; the policy
/// decides whether the packet is one it should touch.
pub trait EgressTimestamper: Send + Sync {
    fn restamp(&self, datagram: &mut [u8], now_us: i64);
}

/// Default policy: rewrite RTP packets carrying MPEG-TS (payload type 33)
/// with the current 90 kHz send time.
pub struct MpegTsRestamper;

impl EgressTimestamper for MpegTsRestamper {
    fn restamp(&self, datagram: &mut [u8], now_us: i64) {
        if datagram.len() < 8
            || datagram[0] != 0x80
            || datagram[1] & 0x7f != RTP_PAYLOAD_TYPE_MPEG_TS
        {
            return;
        }

        let prev_rtp_time = u32::from_be_bytes([
            datagram[4],
            datagram[5],
            datagram[6],
            datagram[7],
        ]);

        // 90kHz time scale
        let rtp_time = ((now_us * 9) / 100) as u32;
        let diff_time = rtp_time.wrapping_sub(prev_rtp_time) as i32;
        debug!("correcting rtpTime by {:.0} ms", diff_time as f64 / 90.0);

        datagram[4..8].copy_from_slice(&rtp_time.to_be_bytes());
    }
}
