//! In-flight frame records
//!
//! A frame lives from ingress to delivery: it sits in exactly one
//! station access-category queue and holds exactly one scheduler job.
//! The payload is opaque 802.11 bytes; the record around it carries the
//! multi-rate-retry chain, the computed medium effects and the routing
//! anchors (sender station, source client).

use crate::daemon::client::ClientId;
use crate::hwsim::HWSIM_TX_STAT_ACK;
use crate::ieee80211::{is_multicast_ether_addr, AcNumber, Ieee80211Hdr};
use crate::scheduler::JobId;
use bytes::Bytes;

/// Identifier of a frame inside the medium's live table.
pub type FrameId = u64;

/// One entry of the multi-rate-retry chain.
///
/// `idx < 0` marks an unused slot, the wire convention of the radio
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRate {
    pub idx: i8,
    pub count: i8,
}

impl TxRate {
    pub const INVALID: TxRate = TxRate { idx: -1, count: -1 };
}

/// A transmitted frame travelling through the medium.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Payload bytes, immutable for the frame's lifetime.
    pub data: Bytes,
    /// Opaque identifier echoed back in the status report.
    pub cookie: u64,
    /// Transmit-control flags from ingress; the ACK status bit is set
    /// here when the retry simulation succeeds.
    pub flags: u32,
    /// Operating frequency [MHz].
    pub freq: u32,
    /// Sender station index.
    pub sender: usize,
    /// Client the frame came in through; delivery status goes back here
    /// and disconnect cancellation matches on it.
    pub src_client: Option<ClientId>,
    /// Multi-rate-retry chain, truncated in place once acked.
    pub tx_rates: Vec<TxRate>,
    /// Signal at the receiver [dBm], computed at queue time.
    pub signal: i32,
    /// Airtime on the medium [usec], computed at queue time.
    pub duration: u64,
    /// Access category the frame is queued under.
    pub ac: AcNumber,
    /// Scheduler job holding the delivery deadline.
    pub job: Option<JobId>,
    /// Absolute delivery deadline [usec].
    pub deadline: u64,
}

impl Frame {
    pub fn header(&self) -> Option<Ieee80211Hdr<'_>> {
        Ieee80211Hdr::new(&self.data)
    }

    /// Destination address from the 802.11 header.
    pub fn dest(&self) -> Option<[u8; 6]> {
        self.header().map(|hdr| hdr.addr1())
    }

    pub fn is_multicast_dest(&self) -> bool {
        self.dest().is_some_and(|dest| is_multicast_ether_addr(&dest))
    }

    /// Frames that never wait for an ACK: management or group-addressed.
    pub fn noack(&self) -> bool {
        self.header().is_some_and(|hdr| hdr.is_mgmt()) || self.is_multicast_dest()
    }

    pub fn acked(&self) -> bool {
        self.flags & HWSIM_TX_STAT_ACK != 0
    }

    pub fn set_acked(&mut self) {
        self.flags |= HWSIM_TX_STAT_ACK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ieee80211::{FTYPE_DATA, FTYPE_MGMT};

    fn frame_with_header(fc0: u8, addr1: [u8; 6]) -> Frame {
        let mut data = vec![fc0, 0, 0, 0];
        data.extend_from_slice(&addr1);
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        data.extend_from_slice(&[0; 8]);
        Frame {
            data: Bytes::from(data),
            cookie: 1,
            flags: 0,
            freq: 2412,
            sender: 0,
            src_client: None,
            tx_rates: vec![TxRate { idx: 0, count: 1 }],
            signal: 0,
            duration: 0,
            ac: AcNumber::Be,
            job: None,
            deadline: 0,
        }
    }

    #[test]
    fn test_noack_rules() {
        let unicast_data = frame_with_header(FTYPE_DATA, [0x02, 0, 0, 0, 0, 2]);
        assert!(!unicast_data.noack());

        let mgmt = frame_with_header(FTYPE_MGMT, [0x02, 0, 0, 0, 0, 2]);
        assert!(mgmt.noack());

        let broadcast = frame_with_header(FTYPE_DATA, [0xff; 6]);
        assert!(broadcast.noack());
    }

    #[test]
    fn test_ack_flag() {
        let mut frame = frame_with_header(FTYPE_DATA, [0x02, 0, 0, 0, 0, 2]);
        assert!(!frame.acked());
        frame.set_acked();
        assert!(frame.acked());
        assert_eq!(frame.flags & HWSIM_TX_STAT_ACK, HWSIM_TX_STAT_ACK);
    }
}
