//! Frame layout for 16-bit intra-PAN 802.15.4 frames
//!
//! On air a frame is a length byte followed by a fixed 9 byte header, the
//! payload, and a 2 byte footer. On transmit the hardware fills in the footer
//! (FCS), on receive it replaces the FCS with RSSI / correlation / CRC status.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;

use ieee802154::mac::{FrameType, PanId, ShortAddress};

/// Maximum on-air frame length, excluding the length byte
pub const MAX_FRAME_LEN: usize = 127;

/// fc0, fc1, seq, dst_pan, dst, src
pub const HEADER_LEN: usize = 9;

/// RSSI, CRC OK / correlation
pub const FOOTER_LEN: usize = 2;

/// fc0, fc1, seq plus footer
pub const ACK_FRAME_LEN: usize = 5;

/// Header and footer with no payload
pub const DATA_ACK_LEN: usize = HEADER_LEN + FOOTER_LEN;

pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN - FOOTER_LEN;

/// fc1 for 16-bit destination and source addresses
pub const FC1_SHORT_ADDRESSING: u8 = 0x88;

const FC0_TYPE_MASK: u8 = 0x07;
const FOOTER1_CRC_OK: u8 = 0x80;
const FOOTER1_CORRELATION: u8 = 0x7f;

/// Broadcast short address
pub const BROADCAST: ShortAddress = ShortAddress(0xffff);

bitflags::bitflags! {
    /// Frame control flags carried in fc0 alongside the frame type
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FrameFlags: u8 {
        const SECURITY = 0x08;
        const FRAME_PENDING = 0x10;
        const ACK_REQUEST = 0x20;
        const INTRA_PAN = 0x40;
    }
}

/// Decode the frame type field of fc0
pub fn frame_type(fc0: u8) -> Option<FrameType> {
    match fc0 & FC0_TYPE_MASK {
        0b000 => Some(FrameType::Beacon),
        0b001 => Some(FrameType::Data),
        0b010 => Some(FrameType::Acknowledgement),
        0b011 => Some(FrameType::MacCommand),
        _ => None,
    }
}

fn frame_type_bits(t: FrameType) -> u8 {
    match t {
        FrameType::Beacon => 0b000,
        FrameType::Data => 0b001,
        FrameType::Acknowledgement => 0b010,
        FrameType::MacCommand => 0b011,
        #[allow(unreachable_patterns)]
        _ => FC0_TYPE_MASK,
    }
}

/// Fixed layout MAC header
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    /// Raw fc1 (addressing modes and version)
    pub addressing: u8,
    /// Sequence number, assigned by the driver on send
    pub seq: u8,
    /// Destination PAN, assigned by the driver on send
    pub dst_pan: PanId,
    pub dst: ShortAddress,
    pub src: ShortAddress,
}

impl Header {
    /// Intra-PAN data header with 16-bit addressing
    pub fn data(dst: ShortAddress, src: ShortAddress) -> Self {
        Self {
            frame_type: FrameType::Data,
            flags: FrameFlags::INTRA_PAN,
            addressing: FC1_SHORT_ADDRESSING,
            seq: 0,
            dst_pan: PanId(0xffff),
            dst,
            src,
        }
    }

    pub fn fc0(&self) -> u8 {
        frame_type_bits(self.frame_type) | self.flags.bits()
    }

    pub fn is_broadcast(&self) -> bool {
        self.dst == BROADCAST
    }

    /// Encode into the first [`HEADER_LEN`] bytes of `buf`
    ///
    /// # Panics
    ///
    /// If `buf` is shorter than [`HEADER_LEN`].
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.fc0();
        buf[1] = self.addressing;
        buf[2] = self.seq;
        LittleEndian::write_u16(&mut buf[3..5], self.dst_pan.0);
        LittleEndian::write_u16(&mut buf[5..7], self.dst.0);
        LittleEndian::write_u16(&mut buf[7..9], self.src.0);
        HEADER_LEN
    }

    /// Decode a header, `None` on short input or a reserved frame type
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }

        Some(Self {
            frame_type: frame_type(buf[0])?,
            flags: FrameFlags::from_bits_truncate(buf[0]),
            addressing: buf[1],
            seq: buf[2],
            dst_pan: PanId(LittleEndian::read_u16(&buf[3..5])),
            dst: ShortAddress(LittleEndian::read_u16(&buf[5..7])),
            src: ShortAddress(LittleEndian::read_u16(&buf[7..9])),
        })
    }
}

/// Receive footer appended by the hardware in place of the FCS
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Footer {
    pub rssi: i8,
    pub correlation: u8,
    pub crc_ok: bool,
}

impl Footer {
    pub fn decode(raw: [u8; FOOTER_LEN]) -> Self {
        Self {
            rssi: raw[0] as i8,
            correlation: raw[1] & FOOTER1_CORRELATION,
            crc_ok: raw[1] & FOOTER1_CRC_OK != 0,
        }
    }

    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let crc = if self.crc_ok { FOOTER1_CRC_OK } else { 0 };
        [self.rssi as u8, crc | (self.correlation & FOOTER1_CORRELATION)]
    }
}

/// Frame object with owned payload storage
#[derive(Clone, Debug)]
pub struct Frame {
    pub header: Header,

    payload: Vec<u8, MAX_PAYLOAD_LEN>,

    pub footer: Footer,
}

impl PartialEq for Frame {
    fn eq(&self, o: &Self) -> bool {
        self.header == o.header &&
        self.payload() == o.payload() &&
        self.footer == o.footer
    }
}

impl Frame {
    pub fn new(header: Header, payload: &[u8]) -> Result<Self, ()> {
        Ok(Self {
            header,
            payload: Vec::from_slice(payload)?,
            footer: Footer::default(),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Received signal strength, valid for received frames
    pub fn rssi(&self) -> i8 {
        self.footer.rssi
    }

    /// Link quality (correlation), valid for received frames
    pub fn lqi(&self) -> u8 {
        self.footer.correlation
    }

    /// On-air length as written into the length byte
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.len() + FOOTER_LEN
    }

    /// Encode header and payload (the hardware appends the footer)
    ///
    /// # Panics
    ///
    /// If `buf` is shorter than `self.len() - FOOTER_LEN`, a buffer of
    /// [`MAX_FRAME_LEN`] always fits.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let mut len = self.header.encode(buf);

        buf[len..len + self.payload.len()].copy_from_slice(&self.payload);
        len += self.payload.len();

        len
    }

    /// Decode header, payload and footer as read back from the RX FIFO
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN + FOOTER_LEN {
            return None;
        }

        let header = Header::decode(buf)?;

        let footer_pos = buf.len() - FOOTER_LEN;
        let footer = Footer::decode([buf[footer_pos], buf[footer_pos + 1]]);

        let payload = Vec::from_slice(&buf[HEADER_LEN..footer_pos]).ok()?;

        Some(Self { header, payload, footer })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_layout() {
        let mut h = Header::data(ShortAddress(0x0201), ShortAddress(0x0403));
        h.seq = 7;
        h.dst_pan = PanId(0xabcd);

        let mut buff = [0u8; HEADER_LEN];
        assert_eq!(h.encode(&mut buff), HEADER_LEN);

        assert_eq!(buff, [0x41, 0x88, 7, 0xcd, 0xab, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(Header::decode(&buff), Some(h));
    }

    #[test]
    fn header_reserved_type() {
        let buff = [0x07, 0x88, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(Header::decode(&buff), None);
        assert_eq!(Header::decode(&buff[..4]), None);
    }

    #[test]
    fn footer_bits() {
        let f = Footer::decode([0xd6, 0x80 | 105]);
        assert_eq!(f, Footer{ rssi: -42, correlation: 105, crc_ok: true });
        assert_eq!(f.encode(), [0xd6, 0x80 | 105]);

        assert_eq!(Footer::decode([0, 0x7f]).crc_ok, false);
    }

    #[test]
    fn frame_decode_received() {
        let h = Header::data(ShortAddress(2), ShortAddress(3));
        let frame = Frame::new(h, &[1, 2, 3]).unwrap();

        let mut buff = [0u8; MAX_FRAME_LEN];
        let n = frame.encode(&mut buff);
        assert_eq!(n + FOOTER_LEN, frame.len());

        buff[n..n + 2].copy_from_slice(&[0xf0, 0x80 | 90]);

        let rx = Frame::decode(&buff[..n + 2]).unwrap();
        assert_eq!(rx.header, h);
        assert_eq!(rx.payload(), &[1, 2, 3]);
        assert_eq!(rx.rssi(), -16);
        assert_eq!(rx.lqi(), 90);
    }

    #[test]
    fn frame_payload_limit() {
        let h = Header::data(ShortAddress(2), ShortAddress(3));
        assert!(Frame::new(h, &[0u8; MAX_PAYLOAD_LEN]).is_ok());
        assert!(Frame::new(h, &[0u8; MAX_PAYLOAD_LEN + 1]).is_err());
    }
}
