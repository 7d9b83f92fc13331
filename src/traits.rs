//! Implementations of the `radio` crate traits for [`Core`]
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use rand_core::RngCore;

use crate::log::debug;

use crate::error::CoreError;
use crate::hal::{Hardware, Register, Status};
use crate::mac::Core;
use crate::timer::Timer;

/// Offset from the RSSI register value to dBm
pub const RSSI_OFFSET: i16 = -45;

/// Receiver state exposed through [`radio::State`]
#[derive(Debug, Clone, Copy, PartialEq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    /// Receiver disabled, transmissions rejected
    Off,
    /// Receiver enabled, listening between transmissions
    Receive,
}

impl radio::RadioState for RadioMode {
    fn idle() -> Self {
        RadioMode::Off
    }

    fn sleep() -> Self {
        RadioMode::Off
    }
}

impl <'a, H, E, T, R, const N: usize> radio::State for Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    type State = RadioMode;
    type Error = CoreError<E>;

    fn set_state(&mut self, state: RadioMode) -> Result<(), Self::Error> {
        debug!("Set state {}", state);

        match state {
            RadioMode::Off => self.off(),
            RadioMode::Receive => self.on(),
        }
    }

    fn get_state(&mut self) -> Result<RadioMode, Self::Error> {
        match self.is_on() {
            true => Ok(RadioMode::Receive),
            false => Ok(RadioMode::Off),
        }
    }
}

impl <'a, H, E, T, R, const N: usize> radio::Busy for Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    type Error = CoreError<E>;

    /// Transmitting, or a received frame body still waiting in the FIFO
    fn is_busy(&mut self) -> Result<bool, Self::Error> {
        if self.shared.critical(|i| i.rx_remaining > 0) {
            return Ok(true);
        }

        let s = self.bus(|hw| hw.read_status())?;

        Ok(s.contains(Status::TX_ACTIVE))
    }
}

impl <'a, H, E, T, R, const N: usize> radio::Rssi for Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    type Error = CoreError<E>;

    /// Current channel energy in dBm, requires the receiver to be on
    fn poll_rssi(&mut self) -> Result<i16, Self::Error> {
        if !self.is_on() {
            return Err(CoreError::RadioOff);
        }

        self.wait_status(|s| s.contains(Status::RSSI_VALID))?;

        let reg = self.bus(|hw| hw.read_register(Register::Rssi))?;

        Ok((reg & 0xff) as u8 as i8 as i16 + RSSI_OFFSET)
    }
}

impl <'a, H, E, T, R, const N: usize> radio::Channel for Core<'a, H, T, R, N>
where
    H: Hardware<Error=E>,
    E: Debug,
    T: Timer,
    R: RngCore,
{
    /// 802.15.4 channel number, 11..=26
    type Channel = u8;
    type Error = CoreError<E>;

    fn set_channel(&mut self, channel: &u8) -> Result<(), Self::Error> {
        Core::set_channel(self, *channel)
    }
}
