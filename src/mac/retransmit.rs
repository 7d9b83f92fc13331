//! Retransmission scheduler
//!
//! Owns retry timing for the frame staged in the transmit FIFO. Unicast frames
//! are resent every retry interval until an ACK cancels the sequence or the
//! retransmission bound is reached, and the final count feeds the neighbour
//! table. Broadcast frames get a single on-air transmission, preceded by random
//! jitter so nodes reacting to the same event do not collide.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use rand_core::RngCore;

use ieee802154::mac::ShortAddress;

use crate::log::{debug, info, warn};

use crate::Ts;
use crate::error::CoreError;
use crate::hal::Hardware;
use crate::packet::BROADCAST;
use crate::timer::Timer;

use super::core::Core;

/// Scheduler triggers
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetransmitEvent {
    /// A new frame has been staged
    NewFrame,
    /// Matching ACK observed, stop retrying
    Cancel,
    /// Retry timer check
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetransmitState {
    Idle,
    Pending {
        dst: ShortAddress,
        /// Attempts that went on air
        sent: u8,
        /// Attempts made, including ones that found the channel busy
        rounds: u8,
        /// Next attempt due (microseconds)
        deadline_us: Ts,
    },
}

/// Result of handling a scheduler event
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Round {
    /// No attempt made
    Idle,
    /// Attempt deferred until the scheduled deadline
    Deferred,
    /// Attempt made, `started` if the transmission went on air
    Attempted { started: bool },
}

impl <'a, H, E, T, R, const N: usize> Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    /// Feed an event to the retransmission scheduler
    pub fn retransmit_event(&mut self, ev: RetransmitEvent) -> Result<Round, CoreError<E>> {
        let now = self.timer.ticks_us();

        match (ev, self.retransmit) {
            (RetransmitEvent::NewFrame, _) => {
                let dst = self.shared.critical(|i| i.tx.dst);

                // Broadcast attempts always wait out the jitter
                let deadline_us = match dst == BROADCAST {
                    true => now + self.jitter_us(),
                    false => now,
                };

                self.retransmit = RetransmitState::Pending{ dst, sent: 0, rounds: 0, deadline_us };

                if dst == BROADCAST {
                    debug!("Broadcast scheduled for {} us", deadline_us);
                    return Ok(Round::Deferred);
                }

                self.retransmit_round(now)
            },
            (RetransmitEvent::Timer, RetransmitState::Pending{ deadline_us, .. }) if now >= deadline_us => {
                self.retransmit_round(now)
            },
            (RetransmitEvent::Cancel, RetransmitState::Pending{ dst, sent, .. }) => {
                self.retransmit = RetransmitState::Idle;

                if dst != BROADCAST {
                    self.delivered(dst, sent);
                }

                Ok(Round::Idle)
            },
            _ => Ok(Round::Idle),
        }
    }

    fn retransmit_round(&mut self, now: Ts) -> Result<Round, CoreError<E>> {
        let (dst, mut sent, mut rounds) = match self.retransmit {
            RetransmitState::Pending{ dst, sent, rounds, .. } => (dst, sent, rounds),
            RetransmitState::Idle => return Ok(Round::Idle),
        };

        // An ACK may have landed since the cancel flag was last taken
        if dst != BROADCAST {
            let acked = self.shared.critical(|i| {
                if i.tx.acked {
                    i.cancel_retransmit = false;
                }
                i.tx.acked
            });

            if acked {
                self.retransmit = RetransmitState::Idle;
                self.delivered(dst, sent);
                return Ok(Round::Idle);
            }
        }

        rounds = rounds.saturating_add(1);

        let started = self.resend()?;
        let round = Round::Attempted{ started };

        if dst == BROADCAST {
            if started {
                info!("Rebroadcast on air after {} rounds", rounds);
                self.retransmit = RetransmitState::Idle;
                return Ok(round);
            }
        } else {
            if started {
                sent = sent.saturating_add(1);
                debug!("Transmission {} to {:x}", sent, dst.0);
            }

            // The first transmission is not a retransmission
            if sent > 0 && sent - 1 >= self.config.max_retransmissions {
                debug!("Retransmissions exhausted for {:x}", dst.0);
                self.neighbours.update(dst, self.config.max_retransmissions);
                self.retransmit = RetransmitState::Idle;
                return Ok(round);
            }
        }

        if rounds >= self.config.max_rounds {
            warn!("Giving up on frame to {:x} after {} rounds", dst.0, rounds);
            self.shared.critical(|i| {
                i.stats.retransmit_gave_up = i.stats.retransmit_gave_up.saturating_add(1);
            });
            self.retransmit = RetransmitState::Idle;
            return Ok(round);
        }

        let mut deadline_us = now + self.config.retry_interval_ms() as u64 * 1000;
        if dst == BROADCAST {
            deadline_us += self.jitter_us();
        }

        self.retransmit = RetransmitState::Pending{ dst, sent, rounds, deadline_us };

        Ok(round)
    }

    /// Report a completed unicast exchange to the neighbour table
    fn delivered(&mut self, dst: ShortAddress, sent: u8) {
        let retransmissions = sent.saturating_sub(1);
        debug!("Delivered to {:x} after {} retransmissions", dst.0, retransmissions);
        self.neighbours.update(dst, retransmissions);
    }

    /// Random broadcast delay, `1..=broadcast_jitter_us`
    fn jitter_us(&mut self) -> Ts {
        let bound = self.config.broadcast_jitter_us.max(1);
        1 + (self.rng.next_u32() % bound) as Ts
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::mock::StepRng;

    use crate::mac::{Config, Classification};
    use crate::mock::MockRadio;
    use crate::packet::Header;
    use crate::shared::Shared;
    use crate::timer::mock::MockTimer;

    use super::*;

    struct Sink;

    impl crate::mac::NetworkLayer for Sink {
        fn on_frame_received(&mut self, _frame: &crate::packet::Frame) {}
    }

    const DST: ShortAddress = ShortAddress(0x0002);
    const SRC: ShortAddress = ShortAddress(0x0001);

    fn setup(radio: &MockRadio) -> Shared<MockRadio> {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());
        Shared::new(radio.clone())
    }

    #[test]
    fn unicast_cancelled_by_ack() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(0, 1));
        mac.on().unwrap();

        mac.send(Header::data(DST, SRC), &[1, 2, 3]).unwrap();
        assert_eq!(radio.take_sent().len(), 1);

        // Retry after the interval
        timer.advance_ms(32);
        mac.poll(&mut Sink).unwrap();
        assert_eq!(radio.take_sent().len(), 1);

        // ACK arrives via the interrupt fast path
        let seq = shared.tx_context().seq;
        radio.receive(&[0x02, 0x00, seq], crate::packet::Footer{ rssi: -50, correlation: 100, crc_ok: true });
        assert_eq!(shared.handle_interrupt(), Ok(crate::shared::Interrupt::Ack));

        mac.poll(&mut Sink).unwrap();
        assert_eq!(mac.retransmit_state(), RetransmitState::Idle);
        assert!(mac.ack_received());

        // One retransmission, score 4
        assert_eq!(mac.neighbours().get(DST).unwrap().score, 4);
        assert_eq!(mac.check_remote(DST), Classification::Local);

        // Nothing further goes out
        timer.advance_ms(100);
        mac.poll(&mut Sink).unwrap();
        assert!(radio.take_sent().is_empty());
    }

    #[test]
    fn unicast_retransmission_bound() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(0, 1));
        mac.on().unwrap();

        mac.send(Header::data(DST, SRC), &[1, 2, 3]).unwrap();

        for _ in 0..10 {
            timer.advance_ms(32);
            mac.poll(&mut Sink).unwrap();
        }

        // Initial transmission plus max_retransmissions
        assert_eq!(radio.take_sent().len(), 4);
        assert_eq!(mac.retransmit_state(), RetransmitState::Idle);

        assert_eq!(mac.check_remote(DST), Classification::Remote);

        // A late ACK does not report again
        let seq = shared.tx_context().seq;
        radio.receive(&[0x02, 0x00, seq], crate::packet::Footer{ rssi: -50, correlation: 100, crc_ok: true });
        shared.handle_interrupt().unwrap();
        mac.poll(&mut Sink).unwrap();
        assert_eq!(mac.neighbours().get(DST).unwrap().score, 15);
    }

    #[test]
    fn unicast_busy_channel_retry_interval() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(0, 1));
        mac.on().unwrap();

        timer.set_ms(100);
        radio.state().channel_clear = false;

        assert_eq!(mac.send(Header::data(DST, SRC), &[1]), Err(CoreError::ChannelBusy));
        assert_eq!(mac.next_deadline_us(), Some((100 + 32) * 1000));

        // Nothing before the interval elapses
        radio.state().channel_clear = true;
        timer.advance_ms(31);
        mac.poll(&mut Sink).unwrap();
        assert!(radio.take_sent().is_empty());

        timer.advance_ms(1);
        mac.poll(&mut Sink).unwrap();
        assert_eq!(radio.take_sent().len(), 1);

        // Busy rounds do not count towards retransmissions
        match mac.retransmit_state() {
            RetransmitState::Pending{ sent, rounds, .. } => {
                assert_eq!(sent, 1);
                assert_eq!(rounds, 2);
            },
            s => panic!("unexpected state {:?}", s),
        }
    }

    #[test]
    fn unicast_gives_up_on_jammed_channel() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(0, 1));
        mac.on().unwrap();

        radio.state().channel_clear = false;
        let _ = mac.send(Header::data(DST, SRC), &[1]);

        for _ in 0..20 {
            timer.advance_ms(32);
            mac.poll(&mut Sink).unwrap();
        }

        assert_eq!(mac.retransmit_state(), RetransmitState::Idle);
        assert_eq!(mac.stats().retransmit_gave_up, 1);
        assert_eq!(mac.stats().tx_busy, 16);

        // Congestion says nothing about the neighbour
        assert!(mac.neighbours().get(DST).is_none());
    }

    #[test]
    fn broadcast_single_jittered_attempt() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();

        // Jitter of 1 + 99 us
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(99, 0));
        mac.on().unwrap();

        mac.send(Header::data(BROADCAST, SRC), &[1, 2]).unwrap();
        assert!(radio.take_sent().is_empty());
        assert_eq!(mac.next_deadline_us(), Some(100));

        timer.advance_us(99);
        mac.poll(&mut Sink).unwrap();
        assert!(radio.take_sent().is_empty());

        timer.advance_us(1);
        mac.poll(&mut Sink).unwrap();
        assert_eq!(radio.take_sent().len(), 1);
        assert_eq!(mac.retransmit_state(), RetransmitState::Idle);

        // No further rebroadcasts, no neighbour entry
        for _ in 0..5 {
            timer.advance_ms(32);
            mac.poll(&mut Sink).unwrap();
        }
        assert!(radio.take_sent().is_empty());
        assert!(mac.neighbours().is_empty());
    }

    #[test]
    fn broadcast_retries_busy_channel() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(9, 0));
        mac.on().unwrap();

        radio.state().channel_clear = false;
        mac.send(Header::data(BROADCAST, SRC), &[1, 2]).unwrap();

        timer.advance_us(10);
        assert_eq!(mac.retransmit_event(RetransmitEvent::Timer), Ok(Round::Attempted{ started: false }));

        // Interval plus jitter
        assert_eq!(mac.next_deadline_us(), Some(10 + 32_000 + 10));

        radio.state().channel_clear = true;
        timer.advance_us(32_010);
        assert_eq!(mac.retransmit_event(RetransmitEvent::Timer), Ok(Round::Attempted{ started: true }));
        assert_eq!(mac.retransmit_state(), RetransmitState::Idle);
        assert_eq!(radio.take_sent().len(), 1);
    }

    #[test]
    fn cancel_while_idle_ignored() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), MockTimer::new(), StepRng::new(0, 1));

        assert_eq!(mac.retransmit_event(RetransmitEvent::Cancel), Ok(Round::Idle));
        assert!(mac.neighbours().is_empty());
    }

    #[test]
    fn retry_interval_lower_bound() {
        let mut c = Config::default();
        c.retry_interval_ms = 1;
        assert_eq!(c.retry_interval_ms(), crate::mac::config::MIN_RETRY_INTERVAL_MS);
    }

    #[test]
    fn ack_behind_data_frame_stops_retry() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(0, 1));
        mac.on().unwrap();

        mac.send(Header::data(DST, SRC), &[1, 2, 3]).unwrap();
        assert_eq!(radio.take_sent().len(), 1);

        // Incoming data frame followed by the ACK for our frame
        let mut buff = [0u8; 32];
        let n = crate::packet::Frame::new(Header::data(SRC, ShortAddress(0x0003)), &[9, 9])
            .unwrap().encode(&mut buff);
        let footer = crate::packet::Footer{ rssi: -50, correlation: 100, crc_ok: true };
        radio.receive(&buff[..n], footer);

        let seq = shared.tx_context().seq;
        radio.receive(&[0x02, 0x00, seq], footer);

        assert_eq!(shared.handle_interrupt(), Ok(crate::shared::Interrupt::Pending));
        assert_eq!(shared.handle_interrupt(), Ok(crate::shared::Interrupt::Deferred));

        // Retry falls due in the same pass that reaches the ACK
        timer.advance_ms(32);
        mac.poll(&mut Sink).unwrap();

        assert!(mac.ack_received());
        assert!(radio.take_sent().is_empty());
        assert_eq!(mac.retransmit_state(), RetransmitState::Idle);
        assert_eq!(mac.neighbours().get(DST).unwrap().score, 0);
        assert!(!mac.work_pending());
    }

    #[test]
    fn acked_flag_checked_before_retry() {
        let radio = MockRadio::new();
        let shared = setup(&radio);
        let mut timer = MockTimer::new();
        let mut mac: Core<_, _, _> = Core::new(&shared, Config::default(), timer.clone(), StepRng::new(0, 1));
        mac.on().unwrap();

        mac.send(Header::data(DST, SRC), &[1]).unwrap();
        radio.take_sent();

        // Interrupt completes the ACK between polls, retry already due
        shared.critical(|i| {
            i.tx.acked = true;
            i.cancel_retransmit = true;
        });
        timer.advance_ms(32);

        assert_eq!(mac.retransmit_event(RetransmitEvent::Timer), Ok(Round::Idle));
        assert!(radio.take_sent().is_empty());
        assert_eq!(mac.neighbours().get(DST).unwrap().score, 0);

        // Cancel consumed, nothing reported twice
        assert!(!mac.work_pending());
        mac.poll(&mut Sink).unwrap();
        assert_eq!(mac.neighbours().get(DST).unwrap().score, 0);
    }
}
