//! State shared between the frame-pending interrupt and the driver tasks
//!
//! Every access to the hardware, the transmission context, the receive drain
//! counter and the radio enable flag happens inside [`Shared::critical`]. Critical
//! sections are never nested and never span a polling loop; waits are built from
//! repeated short sections.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};

use ieee802154::mac::{FrameType, PanId, ShortAddress};

use crate::log::{trace, debug, warn};

use crate::error::CoreError;
use crate::hal::{Hardware, Strobe};
use crate::packet::*;

/// Outstanding transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxContext {
    /// Sequence number of the last frame handed to the transmit engine
    pub seq: u8,
    /// Destination of the last frame
    pub dst: ShortAddress,
    /// Matching acknowledgment observed
    pub acked: bool,
}

impl Default for TxContext {
    fn default() -> Self {
        Self {
            seq: 0,
            dst: BROADCAST,
            acked: false,
        }
    }
}

/// Link statistics
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub tx_started: u32,
    pub tx_busy: u32,
    pub rx_frames: u32,
    pub rx_crc_fail: u32,
    pub rx_desync: u32,
    pub rx_overflow: u32,
    pub acks_matched: u32,
    pub data_acks: u32,
    pub retransmit_gave_up: u32,
}

/// Reception pipeline state
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    /// Nothing pending
    Idle,
    /// A frame is waiting in the FIFO for the interrupt handler
    HeaderPending,
    /// Header consumed, `remaining` payload + footer bytes left for the rx task
    BodyDeferred { remaining: u8 },
}

/// Path taken by a frame-pending interrupt
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// Bus busy or a previous body not yet drained, rx task woken
    Deferred,
    /// Length byte out of range, RX FIFO flushed
    Desync,
    /// Under-length or unmatched frame dropped
    Discarded,
    /// Acknowledgment matching the outstanding sequence number
    Ack,
    /// Header read, body left for the rx task
    Pending,
}

pub(crate) struct Inner<H> {
    pub(crate) hw: H,
    pub(crate) tx: TxContext,

    /// Payload + footer bytes left in the RX FIFO for the current frame
    pub(crate) rx_remaining: u8,
    pub(crate) rx_header: [u8; HEADER_LEN],

    pub(crate) receive_on: bool,
    pub(crate) channel: u8,
    pub(crate) pan_id: PanId,
    pub(crate) short_addr: ShortAddress,

    /// Reception task wake pending (coalesced)
    pub(crate) rx_wake: bool,
    /// Retransmission cancel pending (coalesced)
    pub(crate) cancel_retransmit: bool,

    pub(crate) last_rssi: i8,
    pub(crate) last_correlation: u8,

    pub(crate) stats: Stats,
}

impl <H: Hardware> Inner<H> {
    /// Frame pending interrupt body
    ///
    /// Reads as little as possible: matching ACKs are completed here, anything
    /// carrying a payload only has its header consumed.
    pub(crate) fn interrupt(&mut self) -> Result<Interrupt, CoreError<H::Error>> {
        self.hw.clear_fifop_interrupt();

        if self.hw.bus_busy() || self.rx_remaining > 0 {
            trace!("Deferring interrupt ({} bytes pending)", self.rx_remaining);
            self.rx_wake = true;
            return Ok(Interrupt::Deferred);
        }

        let length = self.hw.read_fifo_byte().map_err(CoreError::Hardware)? as usize;

        if length > MAX_FRAME_LEN {
            warn!("RX length {} out of sync, flushing", length);
            // A single flush does not reliably clear the FIFO
            self.hw.strobe(Strobe::FlushRx).map_err(CoreError::Hardware)?;
            self.hw.strobe(Strobe::FlushRx).map_err(CoreError::Hardware)?;
            self.stats.rx_desync = self.stats.rx_desync.saturating_add(1);
            return Ok(Interrupt::Desync);
        }

        if length < ACK_FRAME_LEN {
            self.hw.discard_fifo(length).map_err(CoreError::Hardware)?;
            return Ok(Interrupt::Discarded);
        }

        let mut h = [0u8; HEADER_LEN];
        self.hw.read_fifo(&mut h[..ACK_FRAME_LEN]).map_err(CoreError::Hardware)?;

        if length == ACK_FRAME_LEN && frame_type(h[0]) == Some(FrameType::Acknowledgement) {
            let footer = Footer::decode([h[3], h[4]]);

            if footer.crc_ok && h[2] == self.tx.seq {
                debug!("ACK for seq {}", h[2]);
                self.tx.acked = true;
                self.cancel_retransmit = true;
                self.stats.acks_matched = self.stats.acks_matched.saturating_add(1);
                return Ok(Interrupt::Ack);
            }

            return Ok(Interrupt::Discarded);
        }

        if length < DATA_ACK_LEN {
            self.hw.discard_fifo(length - ACK_FRAME_LEN).map_err(CoreError::Hardware)?;
            return Ok(Interrupt::Discarded);
        }

        // dst and src, the rest is drained by the rx task
        self.hw.read_fifo(&mut h[ACK_FRAME_LEN..]).map_err(CoreError::Hardware)?;

        self.rx_header = h;
        self.rx_remaining = (length - HEADER_LEN) as u8;
        self.rx_wake = true;

        Ok(Interrupt::Pending)
    }
}

/// Interrupt / task shared driver state
pub struct Shared<H> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<H>>>,
}

impl <H> Shared<H> {
    pub fn new(hw: H) -> Self {
        let inner = Inner {
            hw,
            tx: TxContext::default(),
            rx_remaining: 0,
            rx_header: [0u8; HEADER_LEN],
            receive_on: false,
            channel: 11,
            pan_id: PanId(0xffff),
            short_addr: ShortAddress(0x0000),
            rx_wake: false,
            cancel_retransmit: false,
            last_rssi: 0,
            last_correlation: 0,
            stats: Stats::default(),
        };

        Self {
            inner: Mutex::new(RefCell::new(inner)),
        }
    }

    /// Run `f` with the frame-pending interrupt masked
    pub(crate) fn critical<R>(&self, f: impl FnOnce(&mut Inner<H>) -> R) -> R {
        self.inner.lock(|c| f(&mut *c.borrow_mut()))
    }

    pub fn tx_context(&self) -> TxContext {
        self.critical(|i| i.tx)
    }

    pub fn stats(&self) -> Stats {
        self.critical(|i| i.stats.clone())
    }

    pub fn is_on(&self) -> bool {
        self.critical(|i| i.receive_on)
    }
}

impl <H: Hardware> Shared<H> {
    /// Frame pending (FIFOP) interrupt entry point
    pub fn handle_interrupt(&self) -> Result<Interrupt, CoreError<H::Error>> {
        self.critical(|i| i.interrupt())
    }

    pub fn rx_state(&self) -> RxState {
        self.critical(|i| {
            if i.rx_remaining > 0 {
                RxState::BodyDeferred { remaining: i.rx_remaining }
            } else if i.hw.fifop() {
                RxState::HeaderPending
            } else {
                RxState::Idle
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::mock::MockRadio;

    fn data_frame(seq: u8, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut h = Header::data(ShortAddress(2), ShortAddress(3));
        h.seq = seq;
        let f = Frame::new(h, payload).unwrap();

        let mut buff = [0u8; MAX_FRAME_LEN];
        let n = f.encode(&mut buff);
        buff[..n].to_vec()
    }

    fn ok_footer() -> Footer {
        Footer{ rssi: -60, correlation: 100, crc_ok: true }
    }

    #[test]
    fn interrupt_reads_header_only() {
        let radio = MockRadio::new();
        let shared = Shared::new(radio.clone());

        radio.receive(&data_frame(4, &[1, 2, 3, 4]), ok_footer());
        assert_eq!(shared.rx_state(), RxState::HeaderPending);

        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Pending));
        assert_eq!(shared.rx_state(), RxState::BodyDeferred{ remaining: 6 });

        // Payload and footer left for the task
        assert_eq!(radio.state().rx_fifo.len(), 6);
        assert_eq!(radio.state().fifop_clears, 1);
        assert!(shared.critical(|i| i.rx_wake));
    }

    #[test]
    fn interrupt_defers_while_body_pending() {
        let radio = MockRadio::new();
        let shared = Shared::new(radio.clone());

        radio.receive(&data_frame(4, &[1, 2, 3, 4]), ok_footer());
        radio.receive(&data_frame(5, &[5, 6]), ok_footer());

        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Pending));
        shared.critical(|i| i.rx_wake = false);

        let before = radio.state().rx_fifo.len();

        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Deferred));
        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Deferred));

        // No bytes consumed, wakes coalesce into one
        assert_eq!(radio.state().rx_fifo.len(), before);
        assert!(shared.critical(|i| i.rx_wake));
    }

    #[test]
    fn interrupt_defers_on_bus_busy() {
        let radio = MockRadio::new();
        let shared = Shared::new(radio.clone());

        radio.receive(&data_frame(4, &[1]), ok_footer());
        radio.state().bus_busy = true;

        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Deferred));
        assert_eq!(shared.rx_state(), RxState::HeaderPending);
    }

    #[test]
    fn interrupt_desync_double_flush() {
        let radio = MockRadio::new();
        let shared = Shared::new(radio.clone());

        radio.receive_raw(&[200, 1, 2, 3]);

        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Desync));
        assert_eq!(radio.strobe_count(Strobe::FlushRx), 2);
        assert_eq!(shared.rx_state(), RxState::Idle);
        assert_eq!(shared.stats().rx_desync, 1);
    }

    #[test]
    fn interrupt_discards_short_frames() {
        let radio = MockRadio::new();
        let shared = Shared::new(radio.clone());

        // Shorter than an ACK
        radio.receive_raw(&[3, 0x41, 0x88, 0]);
        // Longer than an ACK, shorter than a header
        radio.receive_raw(&[7, 0x41, 0x88, 0, 0, 0, 0, 0]);

        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Discarded));
        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Discarded));
        assert_eq!(shared.rx_state(), RxState::Idle);
    }

    #[test]
    fn interrupt_ack_match() {
        let radio = MockRadio::new();
        let shared = Shared::new(radio.clone());

        shared.critical(|i| i.tx = TxContext{ seq: 9, dst: ShortAddress(2), acked: false });

        // Wrong sequence number
        radio.receive(&[0x02, 0x00, 8], ok_footer());
        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Discarded));
        assert_eq!(shared.tx_context().acked, false);

        // Bad CRC
        radio.receive(&[0x02, 0x00, 9], Footer{ crc_ok: false, ..ok_footer() });
        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Discarded));
        assert_eq!(shared.tx_context().acked, false);

        radio.receive(&[0x02, 0x00, 9], ok_footer());
        assert_eq!(shared.handle_interrupt(), Ok(Interrupt::Ack));
        assert_eq!(shared.tx_context().acked, true);
        assert!(shared.critical(|i| i.cancel_retransmit));
        assert_eq!(shared.rx_state(), RxState::Idle);
    }
}
