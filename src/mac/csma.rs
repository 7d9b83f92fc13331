//! CSMA-CA transmit engine
//!
//! Frames are staged once in the TX FIFO by [`Core::send`] and put on air by
//! [`Core::resend`], which the retransmission scheduler repeats as needed.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use rand_core::RngCore;

use ieee802154::mac::ShortAddress;

use crate::log::{trace, debug};

use crate::error::CoreError;
use crate::hal::{Hardware, Status, Strobe};
use crate::packet::*;
use crate::shared::TxContext;
use crate::timer::Timer;

use super::core::Core;
use super::retransmit::{RetransmitEvent, Round};

impl <'a, H, E, T, R, const N: usize> Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    /// Stage a frame and hand it to the retransmission scheduler
    ///
    /// The sequence number and destination PAN of `header` are assigned here.
    /// Unicast frames are attempted immediately, returning [`CoreError::ChannelBusy`]
    /// if the channel was occupied (the scheduler keeps retrying). Broadcast frames
    /// are sent after a random delay from [`Core::poll`].
    pub fn send(&mut self, mut header: Header, payload: &[u8]) -> Result<(), CoreError<E>> {
        if HEADER_LEN + payload.len() + FOOTER_LEN > MAX_FRAME_LEN {
            return Err(CoreError::FrameTooLarge);
        }

        if !self.shared.is_on() {
            return Err(CoreError::RadioOff);
        }

        // Previous transmission finished and channel energy can be sampled
        self.wait_status(|s| s.contains(Status::RSSI_VALID) && !s.contains(Status::TX_ACTIVE))?;

        let (seq, pan) = self.shared.critical(|i| {
            let seq = i.tx.seq.wrapping_add(1);
            i.tx = TxContext{ seq, dst: header.dst, acked: false };
            (seq, i.pan_id)
        });

        header.seq = seq;
        header.dst_pan = pan;

        trace!("Staging seq {} to {:x} ({} bytes)", seq, header.dst.0, payload.len());

        let mut buff = [0u8; 1 + HEADER_LEN];
        buff[0] = (HEADER_LEN + payload.len() + FOOTER_LEN) as u8;
        header.encode(&mut buff[1..]);

        self.bus(|hw| hw.strobe(Strobe::FlushTx))?;
        self.bus(|hw| hw.write_fifo(&buff))?;
        if !payload.is_empty() {
            self.bus(|hw| hw.write_fifo(payload))?;
        }

        match self.retransmit_event(RetransmitEvent::NewFrame)? {
            Round::Attempted{ started: false } => Err(CoreError::ChannelBusy),
            _ => Ok(()),
        }
    }

    /// Attempt to transmit the frame currently staged in the TX FIFO
    ///
    /// Returns `true` if transmission started, `false` if the channel was busy
    /// or an incoming frame took the receiver.
    pub fn resend(&mut self) -> Result<bool, CoreError<E>> {
        self.shared.critical(|i| {
            // FIFOP high with FIFO low, let the rx task flush
            if i.hw.fifop() && !i.hw.fifo() {
                i.rx_wake = true;
            }
        });

        let mut started = false;

        if self.shared.critical(|i| i.hw.cca()) {
            self.bus(|hw| hw.strobe(Strobe::TxOnCca))?;

            for _ in 0..self.config.cca_poll_iterations {
                if !self.shared.critical(|i| i.hw.sfd()) {
                    continue;
                }

                // SFD without TX_ACTIVE is a frame being received
                let s = self.bus(|hw| hw.read_status())?;
                started = s.contains(Status::TX_ACTIVE);
                break;
            }
        }

        self.shared.critical(|i| match started {
            true => i.stats.tx_started = i.stats.tx_started.saturating_add(1),
            false => i.stats.tx_busy = i.stats.tx_busy.saturating_add(1),
        });

        debug!("Transmission {}", if started { "started" } else { "busy" });

        Ok(started)
    }

    /// Confirm a broadcast-addressed frame with a payload-less data frame
    pub fn send_data_ack(&mut self, dst: ShortAddress) -> Result<(), CoreError<E>> {
        let src = self.shared.critical(|i| i.short_addr);

        debug!("Data ACK to {:x}", dst.0);

        self.send(Header::data(dst, src), &[])
    }
}
