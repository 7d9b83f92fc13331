//! Deferred half of the reception pipeline
//!
//! The frame-pending interrupt ([`Shared::handle_interrupt`](crate::shared::Shared::handle_interrupt))
//! consumes only the length byte and header. [`Core::poll`] then drains the
//! payload and footer here, validates the frame and hands it upward.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use rand_core::RngCore;

use ieee802154::mac::FrameType;

use crate::log::{trace, debug, warn, error};

use crate::error::CoreError;
use crate::hal::{Hardware, Strobe};
use crate::packet::*;
use crate::shared::Inner;
use crate::timer::Timer;

use super::core::Core;

/// Network layer receiving frames from the link
pub trait NetworkLayer {
    /// Called once for every CRC-valid data frame with a payload
    fn on_frame_received(&mut self, frame: &Frame);

    /// Whether a broadcast-addressed `frame` was meant for this node only and
    /// should be confirmed with a data acknowledgment
    fn data_ack_requested(&mut self, _frame: &Frame) -> bool {
        false
    }
}

impl <H: Hardware> Inner<H> {
    /// Drain the payload and footer of the frame whose header the interrupt
    /// consumed, returning the frame length (header included) held in `buf`
    pub(crate) fn drain(&mut self, buf: &mut [u8; MAX_FRAME_LEN]) -> Result<Option<usize>, CoreError<H::Error>> {
        let remaining = self.rx_remaining as usize;
        if remaining == 0 {
            return Ok(None);
        }

        let len = HEADER_LEN + remaining;

        // Counter corrupted, the interrupt path only records 2..=118
        if remaining < FOOTER_LEN || len > MAX_FRAME_LEN {
            warn!("Dropping {} byte frame body", remaining);
            self.hw.discard_fifo(remaining).map_err(CoreError::Hardware)?;
            self.rx_remaining = 0;
            return Ok(None);
        }

        buf[..HEADER_LEN].copy_from_slice(&self.rx_header);
        self.hw.read_fifo(&mut buf[HEADER_LEN..len]).map_err(CoreError::Hardware)?;
        self.rx_remaining = 0;

        Ok(Some(len))
    }

    /// Recover from RX FIFO overflow or pick up the next pending frame
    pub(crate) fn rx_followup(&mut self) -> Result<(), CoreError<H::Error>> {
        if !self.hw.fifop() {
            return Ok(());
        }

        if !self.hw.fifo() {
            warn!("RX FIFO overflow, flushing");
            self.hw.strobe(Strobe::FlushRx).map_err(CoreError::Hardware)?;
            self.hw.strobe(Strobe::FlushRx).map_err(CoreError::Hardware)?;
            self.stats.rx_overflow = self.stats.rx_overflow.saturating_add(1);
            return Ok(());
        }

        // Another frame is already waiting, run the interrupt path for it
        let r = self.interrupt()?;
        trace!("Follow-up interrupt: {:?}", r);

        Ok(())
    }
}

impl <'a, H, E, T, R, const N: usize> Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    /// Reception task body
    pub(crate) fn receive<U: NetworkLayer>(&mut self, upper: &mut U) -> Result<(), CoreError<E>> {
        let mut buff = [0u8; MAX_FRAME_LEN];

        let len = self.shared.critical(|i| i.drain(&mut buff))?;

        self.shared.critical(|i| i.rx_followup())?;

        let len = match len {
            Some(l) => l,
            None => return Ok(()),
        };

        let frame = match Frame::decode(&buff[..len]) {
            Some(f) => f,
            None => {
                debug!("Undecodable frame ({} bytes)", len);
                return Ok(());
            },
        };

        if !frame.footer.crc_ok {
            debug!("CRC error, dropping frame from {:x}", frame.header.src.0);
            self.shared.critical(|i| i.stats.rx_crc_fail = i.stats.rx_crc_fail.saturating_add(1));
            return Ok(());
        }

        self.shared.critical(|i| {
            i.last_rssi = frame.rssi();
            i.last_correlation = frame.lqi();
        });

        // Header and footer only
        if len == DATA_ACK_LEN {
            let src = frame.header.src;

            let matched = self.shared.critical(|i| {
                i.stats.data_acks = i.stats.data_acks.saturating_add(1);
                if i.tx.dst == src {
                    i.tx.acked = true;
                }
                i.tx.acked
            });

            debug!("Data ACK from {:x} (matched: {})", src.0, matched);

            self.neighbours.update(src, 0);

            return Ok(());
        }

        if frame.header.frame_type != FrameType::Data {
            trace!("Ignoring non-data frame from {:x}", frame.header.src.0);
            return Ok(());
        }

        trace!("Received seq {} from {:x} ({} bytes, rssi {}, lqi {})",
            frame.header.seq, frame.header.src.0, frame.payload().len(), frame.rssi(), frame.lqi());

        if frame.header.is_broadcast() && upper.data_ack_requested(&frame) {
            if self.send_data_ack(frame.header.src).is_err() {
                error!("Data ACK to {:x} failed", frame.header.src.0);
            }
        }

        self.shared.critical(|i| i.stats.rx_frames = i.stats.rx_frames.saturating_add(1));

        upper.on_frame_received(&frame);

        Ok(())
    }
}
