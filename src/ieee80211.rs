//! 802.11 header accessors
//!
//! This module contains the minimal slice of 802.11 the medium needs:
//! frame-type tests, address extraction and the QoS-TID to
//! access-category mapping used for queue selection.

use serde::{Deserialize, Serialize};

/// Frame-control type mask (first FC byte).
pub const FCTL_FTYPE: u8 = 0x0c;
/// Management frame type.
pub const FTYPE_MGMT: u8 = 0x00;
/// Data frame type.
pub const FTYPE_DATA: u8 = 0x08;
/// QoS-Data subtype bit (first FC byte).
pub const STYPE_QOS_DATA: u8 = 0x80;
/// To-DS flag (second FC byte).
pub const FCTL_TODS: u8 = 0x01;
/// From-DS flag (second FC byte).
pub const FCTL_FROMDS: u8 = 0x02;
/// 802.1D tag bits of the QoS control field.
pub const QOS_CTL_TAG1D_MASK: u8 = 0x07;

/// Shortest header the medium will accept: addr1 + addr2 + FC/duration.
pub const MIN_FRAME_LEN: usize = 6 + 6 + 4;

/// 802.11 access categories, numbered the way the stack numbers them:
/// lower value means more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AcNumber {
    /// Voice
    Vo = 0,
    /// Video
    Vi = 1,
    /// Best effort
    Be = 2,
    /// Background
    Bk = 3,
}

/// Number of access categories.
pub const NUM_ACS: usize = 4;

/// 802.1D priority tag to access category.
const IEEE802_1D_TO_AC: [AcNumber; 8] = [
    AcNumber::Be,
    AcNumber::Bk,
    AcNumber::Bk,
    AcNumber::Be,
    AcNumber::Vi,
    AcNumber::Vi,
    AcNumber::Vo,
    AcNumber::Vo,
];

impl AcNumber {
    /// All categories in numeric order (most important first).
    pub const ALL: [AcNumber; NUM_ACS] = [AcNumber::Vo, AcNumber::Vi, AcNumber::Be, AcNumber::Bk];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Map an 802.1D priority tag to its access category.
    pub fn from_tag_1d(tag: u8) -> Self {
        IEEE802_1D_TO_AC[(tag & QOS_CTL_TAG1D_MASK) as usize]
    }

    /// Categories at least as important as this one, most important first.
    ///
    /// Numerically that is `0..=self`: VO only sees VO, BK sees everything.
    pub fn at_least_as_important(self) -> impl Iterator<Item = AcNumber> {
        Self::ALL.into_iter().take(self.index() + 1)
    }

    /// Contention window bounds (cw_min, cw_max) for this category.
    pub fn cw_bounds(self) -> (u32, u32) {
        match self {
            AcNumber::Bk | AcNumber::Be => (15, 1023),
            AcNumber::Vi => (7, 15),
            AcNumber::Vo => (3, 7),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AcNumber::Vo => "VO",
            AcNumber::Vi => "VI",
            AcNumber::Be => "BE",
            AcNumber::Bk => "BK",
        }
    }
}

/// View over a raw 802.11 frame payload.
///
/// The medium never mutates the payload; all accessors read the fixed
/// header layout. Callers must have checked [`MIN_FRAME_LEN`] first.
#[derive(Debug, Clone, Copy)]
pub struct Ieee80211Hdr<'a> {
    data: &'a [u8],
}

impl<'a> Ieee80211Hdr<'a> {
    pub fn new(data: &'a [u8]) -> Option<Self> {
        if data.len() < MIN_FRAME_LEN {
            return None;
        }
        Some(Self { data })
    }

    /// Receiver address (addr1).
    pub fn addr1(&self) -> [u8; 6] {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&self.data[4..10]);
        addr
    }

    /// Transmitter address (addr2).
    pub fn addr2(&self) -> [u8; 6] {
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&self.data[10..16]);
        addr
    }

    /// Both To-DS and From-DS set: the header carries a fourth address.
    pub fn has_a4(&self) -> bool {
        self.data[1] & (FCTL_TODS | FCTL_FROMDS) == (FCTL_TODS | FCTL_FROMDS)
    }

    pub fn is_mgmt(&self) -> bool {
        self.data[0] & FCTL_FTYPE == FTYPE_MGMT
    }

    pub fn is_data(&self) -> bool {
        self.data[0] & FCTL_FTYPE == FTYPE_DATA
    }

    pub fn is_data_qos(&self) -> bool {
        self.data[0] & (FCTL_FTYPE | STYPE_QOS_DATA) == (FTYPE_DATA | STYPE_QOS_DATA)
    }

    /// Low byte of the QoS control field, if the frame has one.
    pub fn qos_ctl(&self) -> Option<u8> {
        if !self.is_data_qos() {
            return None;
        }
        let offset = if self.has_a4() { 30 } else { 24 };
        self.data.get(offset).copied()
    }

    /// Select the access-category queue for this frame.
    ///
    /// Non-data frames ride VO, non-QoS data rides BE, QoS data maps its
    /// 802.1D tag through the standard table.
    pub fn select_queue(&self) -> AcNumber {
        if !self.is_data() {
            return AcNumber::Vo;
        }
        match self.qos_ctl() {
            Some(qos) => AcNumber::from_tag_1d(qos),
            None => AcNumber::Be,
        }
    }
}

/// Group-addressed destination (broadcast or multicast).
pub fn is_multicast_ether_addr(addr: &[u8; 6]) -> bool {
    addr[0] & 0x01 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(qos: Option<u8>, a4: bool) -> Vec<u8> {
        let mut fc0 = FTYPE_DATA;
        if qos.is_some() {
            fc0 |= STYPE_QOS_DATA;
        }
        let fc1 = if a4 { FCTL_TODS | FCTL_FROMDS } else { 0 };
        let mut buf = vec![fc0, fc1, 0, 0];
        buf.extend_from_slice(&[0xff; 6]); // addr1
        buf.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]); // addr2
        buf.extend_from_slice(&[0; 6]); // addr3
        buf.extend_from_slice(&[0; 2]); // seq
        if a4 {
            buf.extend_from_slice(&[0; 6]);
        }
        if let Some(tid) = qos {
            buf.push(tid);
            buf.push(0);
        }
        buf
    }

    #[test]
    fn test_queue_selection_mgmt() {
        let mut buf = data_frame(None, false);
        buf[0] = FTYPE_MGMT;
        let hdr = Ieee80211Hdr::new(&buf).unwrap();
        assert!(hdr.is_mgmt());
        assert_eq!(hdr.select_queue(), AcNumber::Vo);
    }

    #[test]
    fn test_queue_selection_plain_data() {
        let buf = data_frame(None, false);
        let hdr = Ieee80211Hdr::new(&buf).unwrap();
        assert!(hdr.is_data());
        assert!(!hdr.is_data_qos());
        assert_eq!(hdr.select_queue(), AcNumber::Be);
    }

    #[test]
    fn test_queue_selection_qos_tids() {
        for (tid, ac) in [
            (0u8, AcNumber::Be),
            (1, AcNumber::Bk),
            (4, AcNumber::Vi),
            (6, AcNumber::Vo),
        ] {
            let buf = data_frame(Some(tid), false);
            let hdr = Ieee80211Hdr::new(&buf).unwrap();
            assert_eq!(hdr.select_queue(), ac, "tid {}", tid);
        }
    }

    #[test]
    fn test_qos_offset_with_a4() {
        let buf = data_frame(Some(5), true);
        let hdr = Ieee80211Hdr::new(&buf).unwrap();
        assert!(hdr.has_a4());
        assert_eq!(hdr.qos_ctl(), Some(5));
        assert_eq!(hdr.select_queue(), AcNumber::Vi);
    }

    #[test]
    fn test_addresses() {
        let buf = data_frame(None, false);
        let hdr = Ieee80211Hdr::new(&buf).unwrap();
        assert_eq!(hdr.addr1(), [0xff; 6]);
        assert_eq!(hdr.addr2(), [0x02, 0, 0, 0, 0, 1]);
        assert!(is_multicast_ether_addr(&hdr.addr1()));
        assert!(!is_multicast_ether_addr(&hdr.addr2()));
    }

    #[test]
    fn test_priority_order() {
        let scanned: Vec<_> = AcNumber::Be.at_least_as_important().collect();
        assert_eq!(scanned, vec![AcNumber::Vo, AcNumber::Vi, AcNumber::Be]);
        assert_eq!(AcNumber::Vo.at_least_as_important().count(), 1);
        assert_eq!(AcNumber::Bk.at_least_as_important().count(), 4);
    }

    #[test]
    fn test_cw_bounds() {
        assert_eq!(AcNumber::Be.cw_bounds(), (15, 1023));
        assert_eq!(AcNumber::Vo.cw_bounds(), (3, 7));
    }
}
