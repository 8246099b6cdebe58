//! Three-timestamp clock sync handshake.
//!
//! ```text
//!  node                         server
//!   | -- {kind:sync, t_1} ------> |  t_2 = receive instant
//!   | <-- {kind:sync_resp, t_2, t_3} |  t_3 = instant before the reply is queued
//!   t_4 = node receive instant
//! ```
//!
//! The server side is stateless. The node combines all four readings into
//! an offset and round-trip estimate, see [`SyncSample`].

use lightdance_common::DAY_MICROS;

use crate::model::Frame;

/// Server half of the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncReply {
    pub t_2: u64,
    pub t_3: u64,
}

impl SyncReply {
    /// Build a reply from two day-clock readings.
    ///
    /// `t_3` is never earlier than `t_2`: a clock step backwards or a midnight
    /// wrap between the two readings collapses `t_3` onto `t_2`.
    pub fn from_readings(t_2: u64, t_3: u64) -> Self {
        let t_2 = t_2.min(DAY_MICROS - 1);
        Self {
            t_2,
            t_3: t_3.clamp(t_2, DAY_MICROS - 1),
        }
    }
}

impl From<SyncReply> for Frame {
    fn from(reply: SyncReply) -> Self {
        Frame::SyncResp {
            t_2: reply.t_2,
            t_3: reply.t_3,
        }
    }
}

/// All four readings of one completed handshake, as seen by the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSample {
    /// Node send time
    pub t_1: i64,
    /// Server receive time
    pub t_2: i64,
    /// Server send time
    pub t_3: i64,
    /// Node receive time
    pub t_4: i64,
}

impl SyncSample {
    /// Server clock minus node clock, in microseconds.
    pub fn offset(&self) -> i64 {
        ((self.t_2 - self.t_1) + (self.t_3 - self.t_4)) / 2
    }

    /// Time spent on the wire, excluding server processing.
    pub fn round_trip(&self) -> i64 {
        (self.t_4 - self.t_1) - (self.t_3 - self.t_2)
    }
}
