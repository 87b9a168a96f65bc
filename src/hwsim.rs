//! Generic-netlink types for the simulated-radio protocol
//!
//! The kernel's simulated Wi-Fi driver speaks a small generic-netlink
//! family: user space registers once, then receives FRAME messages for
//! every transmission and answers with cloned FRAME receptions and
//! TX_INFO_FRAME status reports. The family's commands and attributes
//! are `neli` enums and every message is a typed `Nlmsghdr`; the same
//! byte layout travels over the vhost-user and API-socket transports,
//! so [`to_bytes`]/[`from_bytes`] bridge typed messages onto those
//! streams through `neli`'s `Nl` trait.

use crate::frame::TxRate;
use crate::{MediumError, IEEE80211_TX_MAX_RATES};
use bytes::Bytes;
use neli::consts::genl::{Cmd, NlAttrType};
use neli::consts::nl::{NlmF, NlmFFlags};
use neli::genl::{Genlmsghdr, Nlattr};
use neli::neli_enum;
use neli::nl::{NlPayload, Nlmsghdr};
use neli::types::{Buffer, GenlBuffer};
use neli::{FromBytes, Size, ToBytes};

/// This module's own fallible-result alias, kept under a distinct
/// name so it doesn't shadow the bare `Result` identifier that
/// `#[neli_enum]`-generated code resolves against this module's scope.
type CrateResult<T> = crate::Result<T>;

/// Generic-netlink family name to resolve.
pub const FAMILY_NAME: &str = "MAC80211_HWSIM";
/// Protocol version carried in every genl header.
pub const VERSION_NR: u8 = 1;

/// Commands of the simulated-radio family.
#[neli_enum(serialized_type = "u8")]
pub enum HwsimCmd {
    /// Unspecified command to catch errors.
    Unspec = 0,
    /// Register to receive every transmitted frame.
    Register = 1,
    /// A frame, kernel-to-user on transmit and user-to-kernel as a
    /// cloned reception.
    Frame = 2,
    /// Transmit-status report back to the transmitting radio.
    TxInfoFrame = 3,
}
impl Cmd for HwsimCmd {}

/// Attributes of the simulated-radio family.
#[neli_enum(serialized_type = "u16")]
pub enum HwsimAttr {
    /// Unspecified attribute to catch errors.
    Unspec = 0,
    /// Hardware address of the receiving radio.
    AddrReceiver = 1,
    /// Hardware address of the transmitting radio.
    AddrTransmitter = 2,
    /// Raw 802.11 frame bytes.
    Frame = 3,
    /// Transmit-control flags.
    Flags = 4,
    /// Receive rate index reported with a cloned frame.
    RxRate = 5,
    /// Signal at the receiver [dBm].
    Signal = 6,
    /// Multi-rate-retry chain, two bytes per entry.
    TxInfo = 7,
    /// Cookie correlating a transmit with its status report.
    Cookie = 8,
    /// Operating frequency [MHz], present when known.
    Freq = 19,
}
impl NlAttrType for HwsimAttr {}

// Transmit-control flags
/// The sender wants a TX status callback.
pub const HWSIM_TX_CTL_REQ_TX_STATUS: u32 = 1;
/// Do not wait for an ACK.
pub const HWSIM_TX_CTL_NO_ACK: u32 = 1 << 1;
/// Frame was acknowledged.
pub const HWSIM_TX_STAT_ACK: u32 = 1 << 2;

/// Frequency assumed when the attribute is absent [MHz].
pub const DEFAULT_FREQ: u32 = 2412;

/// One message of the simulated-radio family, on any transport.
pub type HwsimMsg = Nlmsghdr<u16, Genlmsghdr<HwsimCmd, HwsimAttr>>;

fn attr<P: Nl>(attr_type: HwsimAttr, payload: P) -> CrateResult<Nlattr<HwsimAttr, Buffer>> {
    Nlattr::new(None, false, false, attr_type, payload)
        .map_err(|e| MediumError::Parse(e.to_string()))
}

fn genl_msg(family_id: u16, cmd: HwsimCmd, attrs: GenlBuffer<HwsimAttr, Buffer>) -> HwsimMsg {
    let genlhdr = Genlmsghdr::new(cmd, VERSION_NR, attrs);
    Nlmsghdr::new(
        None,
        family_id,
        NlmFFlags::new(&[NlmF::Request]),
        None,
        None,
        NlPayload::Payload(genlhdr),
    )
}

/// REGISTER message: ask the kernel to start forwarding frames.
pub fn register_msg(family_id: u16) -> HwsimMsg {
    genl_msg(family_id, HwsimCmd::Register, GenlBuffer::new())
}

/// A transmission as a client injects it (test harnesses and API
/// clients build these; the kernel builds its own).
pub fn transmit_msg(
    family_id: u16,
    transmitter: &[u8; 6],
    data: &[u8],
    flags: u32,
    tx_rates: &[TxRate],
    cookie: u64,
    freq: Option<u32>,
) -> CrateResult<HwsimMsg> {
    let mut rates = Vec::with_capacity(tx_rates.len() * 2);
    for rate in tx_rates {
        rates.push(rate.idx as u8);
        rates.push(rate.count as u8);
    }
    let mut attrs: GenlBuffer<HwsimAttr, Buffer> = GenlBuffer::new();
    attrs.push(attr(HwsimAttr::AddrTransmitter, Buffer::from(&transmitter[..]))?);
    attrs.push(attr(HwsimAttr::Frame, Buffer::from(data))?);
    attrs.push(attr(HwsimAttr::Flags, flags)?);
    attrs.push(attr(HwsimAttr::TxInfo, Buffer::from(rates.as_slice()))?);
    attrs.push(attr(HwsimAttr::Cookie, cookie)?);
    if let Some(freq) = freq {
        attrs.push(attr(HwsimAttr::Freq, freq)?);
    }
    Ok(genl_msg(family_id, HwsimCmd::Frame, attrs))
}

/// Cloned-reception FRAME message towards a receiving radio.
pub fn cloned_frame_msg(
    family_id: u16,
    receiver_hwaddr: &[u8; 6],
    data: &[u8],
    rx_rate: u32,
    signal: i32,
    freq: u32,
) -> CrateResult<HwsimMsg> {
    let mut attrs: GenlBuffer<HwsimAttr, Buffer> = GenlBuffer::new();
    attrs.push(attr(HwsimAttr::AddrReceiver, Buffer::from(&receiver_hwaddr[..]))?);
    attrs.push(attr(HwsimAttr::Frame, Buffer::from(data))?);
    attrs.push(attr(HwsimAttr::RxRate, rx_rate)?);
    attrs.push(attr(HwsimAttr::Freq, freq)?);
    attrs.push(attr(HwsimAttr::Signal, signal as u32)?);
    Ok(genl_msg(family_id, HwsimCmd::Frame, attrs))
}

/// TX_INFO_FRAME status report towards the transmitting radio.
pub fn tx_info_msg(
    family_id: u16,
    transmitter_hwaddr: &[u8; 6],
    flags: u32,
    signal: i32,
    tx_rates: &[TxRate],
    cookie: u64,
) -> CrateResult<HwsimMsg> {
    let mut rates = Vec::with_capacity(tx_rates.len() * 2);
    for rate in tx_rates {
        rates.push(rate.idx as u8);
        rates.push(rate.count as u8);
    }
    let mut attrs: GenlBuffer<HwsimAttr, Buffer> = GenlBuffer::new();
    attrs.push(attr(
        HwsimAttr::AddrTransmitter,
        Buffer::from(&transmitter_hwaddr[..]),
    )?);
    attrs.push(attr(HwsimAttr::Flags, flags)?);
    attrs.push(attr(HwsimAttr::Signal, signal as u32)?);
    attrs.push(attr(HwsimAttr::TxInfo, Buffer::from(rates.as_slice()))?);
    attrs.push(attr(HwsimAttr::Cookie, cookie)?);
    Ok(genl_msg(family_id, HwsimCmd::TxInfoFrame, attrs))
}

/// Render a message for the byte-oriented transports (API socket,
/// vhost-user) and the kernel socket's raw writer.
pub fn to_bytes(msg: &HwsimMsg) -> CrateResult<Vec<u8>> {
    let mut buffer = vec![0u8; msg.asize()];
    msg.serialize(buffer.as_mut_slice().into())
        .map_err(|e| MediumError::Parse(e.to_string()))?;
    Ok(buffer)
}

/// Parse the first netlink message in a byte buffer.
pub fn from_bytes(data: &[u8]) -> CrateResult<HwsimMsg> {
    let msg: HwsimMsg =
        Nl::deserialize(data.into()).map_err(|e| MediumError::Parse(e.to_string()))?;
    Ok(msg)
}

/// Command of a message, if it carries a family payload.
pub fn msg_cmd(msg: &HwsimMsg) -> Option<HwsimCmd> {
    match &msg.nl_payload {
        NlPayload::Payload(genlhdr) => Some(genlhdr.cmd),
        _ => None,
    }
}

/// An ingress transmission parsed from a FRAME message.
#[derive(Debug, Clone)]
pub struct IngressFrame {
    /// Hardware address of the transmitting radio.
    pub transmitter: [u8; 6],
    /// Raw 802.11 payload.
    pub data: Bytes,
    /// Transmit-control flags.
    pub flags: u32,
    /// Multi-rate-retry chain the driver wants simulated.
    pub tx_rates: Vec<TxRate>,
    /// Cookie to echo in the status report.
    pub cookie: u64,
    /// Operating frequency [MHz].
    pub freq: u32,
}

/// Parse a FRAME command into an ingress record.
///
/// Returns `Ok(None)` for other commands (the kernel also multicasts
/// registration traffic we do not care about).
pub fn parse_ingress(data: &[u8]) -> CrateResult<Option<IngressFrame>> {
    let msg = from_bytes(data)?;
    let genlhdr = match &msg.nl_payload {
        NlPayload::Payload(genlhdr) => genlhdr,
        _ => return Ok(None),
    };
    if genlhdr.cmd != HwsimCmd::Frame {
        return Ok(None);
    }
    let handle = genlhdr.get_attr_handle();

    let transmitter = handle
        .get_attr_payload_as_with_len::<Vec<u8>>(HwsimAttr::AddrTransmitter)
        .map_err(|_| MediumError::Parse("FRAME without transmitter".to_string()))?;
    if transmitter.len() < 6 {
        return Err(MediumError::Parse("short transmitter address".to_string()));
    }
    let mut hwaddr = [0u8; 6];
    hwaddr.copy_from_slice(&transmitter[..6]);

    let payload = handle
        .get_attr_payload_as_with_len::<Vec<u8>>(HwsimAttr::Frame)
        .map_err(|_| MediumError::Parse("FRAME without payload".to_string()))?;

    let flags = handle
        .get_attr_payload_as::<u32>(HwsimAttr::Flags)
        .map_err(|_| MediumError::Parse("FRAME without flags".to_string()))?;

    let cookie = handle
        .get_attr_payload_as::<u64>(HwsimAttr::Cookie)
        .map_err(|_| MediumError::Parse("FRAME without cookie".to_string()))?;

    let tx_info = handle
        .get_attr_payload_as_with_len::<Vec<u8>>(HwsimAttr::TxInfo)
        .map_err(|_| MediumError::Parse("FRAME without tx info".to_string()))?;
    let tx_rates = tx_info
        .chunks_exact(2)
        .take(IEEE80211_TX_MAX_RATES)
        .map(|pair| TxRate {
            idx: pair[0] as i8,
            count: pair[1] as i8,
        })
        .collect();

    let freq = handle
        .get_attr_payload_as::<u32>(HwsimAttr::Freq)
        .unwrap_or(DEFAULT_FREQ);

    Ok(Some(IngressFrame {
        transmitter: hwaddr,
        data: Bytes::from(payload),
        flags,
        tx_rates,
        cookie,
        freq,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILY: u16 = 0x21;

    fn sample_rates() -> Vec<TxRate> {
        vec![TxRate { idx: 0, count: 3 }, TxRate { idx: 2, count: 2 }]
    }

    #[test]
    fn test_transmit_roundtrip() {
        let payload: Vec<u8> = (0..24).collect();
        let msg = transmit_msg(
            FAMILY,
            &[0x42, 0, 0, 0, 0, 1],
            &payload,
            HWSIM_TX_CTL_REQ_TX_STATUS,
            &sample_rates(),
            0xdead_beef,
            Some(5180),
        )
        .unwrap();
        let bytes = to_bytes(&msg).unwrap();

        let frame = parse_ingress(&bytes).unwrap().unwrap();
        assert_eq!(frame.transmitter, [0x42, 0, 0, 0, 0, 1]);
        assert_eq!(frame.data.len(), 24);
        assert_eq!(frame.flags, HWSIM_TX_CTL_REQ_TX_STATUS);
        assert_eq!(frame.tx_rates, sample_rates());
        assert_eq!(frame.cookie, 0xdead_beef);
        assert_eq!(frame.freq, 5180);
    }

    #[test]
    fn test_parse_ingress_default_freq() {
        let msg = transmit_msg(FAMILY, &[2, 0, 0, 0, 0, 1], &[0; 24], 0, &[], 1, None).unwrap();
        let bytes = to_bytes(&msg).unwrap();
        let frame = parse_ingress(&bytes).unwrap().unwrap();
        assert_eq!(frame.freq, DEFAULT_FREQ);
    }

    #[test]
    fn test_parse_ignores_other_commands() {
        let bytes = to_bytes(&register_msg(FAMILY)).unwrap();
        assert!(parse_ingress(&bytes).unwrap().is_none());

        let msg = from_bytes(&bytes).unwrap();
        assert_eq!(msg_cmd(&msg), Some(HwsimCmd::Register));
    }

    #[test]
    fn test_tx_info_negative_rate_idx() {
        let rates = [TxRate { idx: 0, count: 2 }, TxRate::INVALID];
        let msg = tx_info_msg(
            FAMILY,
            &[2, 0, 0, 0, 0, 1],
            HWSIM_TX_STAT_ACK,
            -61,
            &rates,
            5,
        )
        .unwrap();
        let msg = from_bytes(&to_bytes(&msg).unwrap()).unwrap();
        assert_eq!(msg_cmd(&msg), Some(HwsimCmd::TxInfoFrame));

        let genlhdr = match &msg.nl_payload {
            NlPayload::Payload(genlhdr) => genlhdr,
            other => panic!("expected payload, got {:?}", other),
        };
        let handle = genlhdr.get_attr_handle();
        let tx_info = handle
            .get_attr_payload_as_with_len::<Vec<u8>>(HwsimAttr::TxInfo)
            .unwrap();
        assert_eq!(tx_info, vec![0, 2, 0xff, 0xff]);
        let signal = handle.get_attr_payload_as::<u32>(HwsimAttr::Signal).unwrap();
        assert_eq!(signal, -61i32 as u32);
        let cookie = handle.get_attr_payload_as::<u64>(HwsimAttr::Cookie).unwrap();
        assert_eq!(cookie, 5);
    }

    #[test]
    fn test_cloned_frame_attrs() {
        let msg = cloned_frame_msg(FAMILY, &[9, 8, 7, 6, 5, 4], &[1, 2, 3, 4], 1, -61, 2412).unwrap();
        let msg = from_bytes(&to_bytes(&msg).unwrap()).unwrap();
        assert_eq!(msg_cmd(&msg), Some(HwsimCmd::Frame));

        let genlhdr = match &msg.nl_payload {
            NlPayload::Payload(genlhdr) => genlhdr,
            other => panic!("expected payload, got {:?}", other),
        };
        let handle = genlhdr.get_attr_handle();
        let receiver = handle
            .get_attr_payload_as_with_len::<Vec<u8>>(HwsimAttr::AddrReceiver)
            .unwrap();
        assert_eq!(receiver, vec![9, 8, 7, 6, 5, 4]);
        assert_eq!(
            handle.get_attr_payload_as::<u32>(HwsimAttr::RxRate).unwrap(),
            1
        );
        assert_eq!(
            handle.get_attr_payload_as::<u32>(HwsimAttr::Freq).unwrap(),
            2412
        );
    }

    #[test]
    fn test_truncated_message_rejected() {
        let bytes = to_bytes(&register_msg(FAMILY)).unwrap();
        assert!(from_bytes(&bytes[..10]).is_err());
    }
}
