
use core::fmt::Debug;

use rand_core::RngCore;

use ieee802154::mac::{PanId, ShortAddress};

use crate::log::{trace, debug, info};

use crate::Ts;
use crate::error::CoreError;
use crate::hal::*;
use crate::shared::{Shared, Stats};
use crate::timer::Timer;

use super::config::Config;
use super::neighbours::{Classification, NeighbourTable};
use super::retransmit::{RetransmitEvent, RetransmitState};
use super::rx::NetworkLayer;

/// Link layer driver
///
/// Generic over the Hardware (H), Timer (T), jitter Rng (R) and neighbour
/// table size (N). Borrows the [`Shared`] state that the frame-pending interrupt
/// also operates on, and owns the state of the reception and retransmission tasks.
pub struct Core<'a, H, T, R, const N: usize = 16> {
    pub(crate) shared: &'a Shared<H>,
    pub(crate) config: Config,

    pub(crate) timer: T,
    pub(crate) rng: R,

    pub(crate) retransmit: RetransmitState,
    pub(crate) neighbours: NeighbourTable<N>,
}

impl <'a, H, E, T, R, const N: usize> Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    /// Create a new driver using the provided shared state
    pub fn new(shared: &'a Shared<H>, config: Config, timer: T, rng: R) -> Self {
        let now = timer.ticks_ms();

        Self {
            shared,
            neighbours: NeighbourTable::new(&config, now),
            config,
            timer,
            rng,
            retransmit: RetransmitState::Idle,
        }
    }

    /// Run a single bus operation inside a critical section
    pub(crate) fn bus<V>(&self, f: impl FnOnce(&mut H) -> Result<V, E>) -> Result<V, CoreError<E>> {
        self.shared.critical(|i| f(&mut i.hw)).map_err(CoreError::Hardware)
    }

    /// Poll the status byte until `ready` holds, bounded by `status_poll_limit`
    pub(crate) fn wait_status(&self, ready: impl Fn(Status) -> bool) -> Result<Status, CoreError<E>> {
        for _ in 0..self.config.status_poll_limit {
            let s = self.bus(|hw| hw.read_status())?;
            if ready(s) {
                return Ok(s);
            }
        }

        Err(CoreError::Timeout)
    }

    /// Configure the transceiver after power up
    pub fn init(&mut self) -> Result<(), CoreError<E>> {
        debug!("Init radio");

        self.shared.critical(|i| i.hw.set_fifop_interrupt(false));

        self.bus(|hw| hw.strobe(Strobe::XOscOn))?;

        // Automatic acknowledgment of frames requesting it
        let reg = self.bus(|hw| hw.read_register(Register::MdmCtrl0))?;
        self.bus(|hw| hw.write_register(Register::MdmCtrl0, reg | AUTOACK))?;

        self.bus(|hw| hw.write_register(Register::MdmCtrl1, corr_thr(20)))?;

        let reg = self.bus(|hw| hw.read_register(Register::RxCtrl1))?;
        self.bus(|hw| hw.write_register(Register::RxCtrl1, reg | RXBPF_LOCUR))?;

        // FIFOP only fires on complete frames
        self.bus(|hw| hw.write_register(Register::IoCfg0, fifop_thr(127)))?;

        let reg = self.bus(|hw| hw.read_register(Register::SecCtrl0))?;
        self.bus(|hw| hw.write_register(Register::SecCtrl0, reg & !RXFIFO_PROTECTION))?;

        self.set_channel_pan_addr(11, PanId(0xffff), ShortAddress(0x0000), None)
    }

    /// Enable the receiver
    pub fn on(&mut self) -> Result<(), CoreError<E>> {
        let was_on = self.shared.critical(|i| core::mem::replace(&mut i.receive_on, true));
        if was_on {
            return Ok(());
        }

        info!("Radio on");

        self.bus(|hw| hw.strobe(Strobe::RxOn))?;
        self.bus(|hw| hw.strobe(Strobe::FlushRx))?;
        self.shared.critical(|i| i.hw.set_fifop_interrupt(true));

        Ok(())
    }

    /// Disable the receiver once any transmission in progress has finished
    pub fn off(&mut self) -> Result<(), CoreError<E>> {
        let was_on = self.shared.critical(|i| core::mem::replace(&mut i.receive_on, false));
        if !was_on {
            return Ok(());
        }

        info!("Radio off");

        self.wait_status(|s| !s.contains(Status::TX_ACTIVE))?;

        self.bus(|hw| hw.strobe(Strobe::RfOff))?;
        self.shared.critical(|i| i.hw.set_fifop_interrupt(false));

        Ok(())
    }

    /// Set channel (11..=26), PAN id and addresses used for address recognition
    pub fn set_channel_pan_addr(&mut self, channel: u8, pan: PanId, addr: ShortAddress, ieee_addr: Option<&[u8; 8]>) -> Result<(), CoreError<E>> {
        if channel < 11 || channel > 26 {
            return Err(CoreError::InvalidChannel(channel));
        }

        // 357 is 2405 - 2048, 0x4000 sets LOCK_THR
        let f = 5 * (channel as u16 - 11) + 357 + 0x4000;

        debug!("Channel {} PAN {:x} address {:x}", channel, pan.0, addr.0);

        // Writing RAM requires a stable oscillator
        self.wait_status(|s| s.contains(Status::XOSC16M_STABLE))?;

        self.shared.critical(|i| {
            i.channel = channel;
            i.pan_id = pan;
            i.short_addr = addr;
        });

        self.bus(|hw| hw.write_register(Register::FsCtrl, f))?;

        self.bus(|hw| {
            hw.write_ram(RamAddress::PanId, &pan.0.to_le_bytes())?;
            hw.write_ram(RamAddress::ShortAddr, &addr.0.to_le_bytes())?;
            if let Some(ieee) = ieee_addr {
                hw.write_ram(RamAddress::IeeeAddr, ieee)?;
            }
            Ok(())
        })
    }

    /// Change channel keeping the current PAN id and short address
    pub fn set_channel(&mut self, channel: u8) -> Result<(), CoreError<E>> {
        let (pan, addr) = self.shared.critical(|i| (i.pan_id, i.short_addr));
        self.set_channel_pan_addr(channel, pan, addr, None)
    }

    /// Run pending driver work: retransmission cancels, reception and retry timers
    ///
    /// Check [`Core::work_pending`] afterwards, reception may have picked up
    /// another frame that needs a further pass.
    pub fn poll<U: NetworkLayer>(&mut self, upper: &mut U) -> Result<(), CoreError<E>> {
        let wake = self.shared.critical(|i| core::mem::take(&mut i.rx_wake));

        if wake {
            self.receive(upper)?;
        }

        // Taken after reception, which can run the ACK fast path
        let cancel = self.shared.critical(|i| core::mem::take(&mut i.cancel_retransmit));

        trace!("Poll at {} us (rx: {} cancel: {})", self.timer.ticks_us(), wake, cancel);

        if cancel {
            self.retransmit_event(RetransmitEvent::Cancel)?;
        }

        self.retransmit_event(RetransmitEvent::Timer)?;

        Ok(())
    }

    /// Reception or a retransmission cancel is waiting for [`Core::poll`]
    ///
    /// Together with [`Core::next_deadline_us`] this tells an executor when the
    /// driver must run again without a new interrupt.
    pub fn work_pending(&self) -> bool {
        self.shared.critical(|i| i.rx_wake || i.cancel_retransmit)
    }

    /// Time at which the next retransmission attempt is due, in microseconds
    pub fn next_deadline_us(&self) -> Option<Ts> {
        match self.retransmit {
            RetransmitState::Pending{ deadline_us, .. } => Some(deadline_us),
            RetransmitState::Idle => None,
        }
    }

    /// Record a successful exchange with `addr` observed by upper layers
    pub fn recv_ok(&mut self, addr: ShortAddress) {
        self.neighbours.update(addr, 0);
    }

    /// Classify a neighbour as local or remote
    pub fn check_remote(&mut self, addr: ShortAddress) -> Classification {
        let now = self.timer.ticks_ms();
        let c = self.neighbours.classify(addr, now);

        trace!("Neighbour {:x} is {}", addr.0, c);

        c
    }

    pub fn neighbours(&self) -> &NeighbourTable<N> {
        &self.neighbours
    }

    pub fn retransmit_state(&self) -> RetransmitState {
        self.retransmit
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_on(&self) -> bool {
        self.shared.is_on()
    }

    pub fn channel(&self) -> u8 {
        self.shared.critical(|i| i.channel)
    }

    /// Last outgoing unicast frame has been acknowledged
    pub fn ack_received(&self) -> bool {
        self.shared.critical(|i| i.tx.acked)
    }

    pub fn last_rssi(&self) -> i8 {
        self.shared.critical(|i| i.last_rssi)
    }

    pub fn last_correlation(&self) -> u8 {
        self.shared.critical(|i| i.last_correlation)
    }

    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }
}
