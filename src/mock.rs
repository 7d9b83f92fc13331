//! Simulated transceiver for host tests and demos
//!
//! Clones of [`MockRadio`] share state, so a test can keep a handle while the
//! driver owns another.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::convert::Infallible;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use crate::hal::{Hardware, RamAddress, Register, Status, Strobe};
use crate::packet::{Footer, FOOTER_LEN};

#[derive(Debug)]
pub struct MockState {
    pub rx_fifo: VecDeque<u8>,
    pub tx_fifo: Vec<u8>,

    /// TX FIFO contents (length byte included) for every transmission that started
    pub sent: Vec<Vec<u8>>,
    pub strobes: Vec<Strobe>,
    pub registers: [u16; 0x10],
    pub ram: Vec<(RamAddress, Vec<u8>)>,

    pub status: Status,
    /// CCA pin level
    pub channel_clear: bool,
    /// An incoming frame owns SFD, transmissions never go active
    pub receiving: bool,
    /// FIFOP high with FIFO low
    pub overflow: bool,
    pub bus_busy: bool,
    /// Keep TX_ACTIVE asserted regardless of progress
    pub stuck_tx: bool,
    /// Transmit-on-CCA strobes are accepted but SFD never asserts
    pub sfd_never: bool,

    pub fifop_irq: bool,
    pub fifop_clears: usize,
    /// Number of SFD pin reads
    pub sfd_reads: usize,

    sfd: bool,
    tx_status_reads: u8,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            rx_fifo: VecDeque::new(),
            tx_fifo: Vec::new(),
            sent: Vec::new(),
            strobes: Vec::new(),
            registers: [0u16; 0x10],
            ram: Vec::new(),
            status: Status::RSSI_VALID | Status::XOSC16M_STABLE,
            channel_clear: true,
            receiving: false,
            overflow: false,
            bus_busy: false,
            stuck_tx: false,
            sfd_never: false,
            fifop_irq: false,
            fifop_clears: 0,
            sfd_reads: 0,
            sfd: false,
            tx_status_reads: 0,
        }
    }
}

/// Mock radio implementing [`Hardware`]
#[derive(Clone, Debug, Default)]
pub struct MockRadio(Arc<Mutex<MockState>>);

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    /// Queue a received frame (header and payload) followed by `footer`
    pub fn receive(&self, data: &[u8], footer: Footer) {
        let mut s = self.state();
        s.rx_fifo.push_back((data.len() + FOOTER_LEN) as u8);
        s.rx_fifo.extend(data.iter());
        s.rx_fifo.extend(footer.encode().iter());
    }

    /// Queue raw bytes, length byte included
    pub fn receive_raw(&self, data: &[u8]) {
        self.state().rx_fifo.extend(data.iter());
    }

    /// Take frames that started transmission
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.state().sent)
    }

    /// Deliver everything transmitted by `self` into the RX FIFO of `to`
    pub fn loopback(&self, to: &MockRadio, footer: Footer) -> usize {
        let sent = self.take_sent();
        for f in &sent {
            to.receive(&f[1..], footer);
        }
        sent.len()
    }

    pub fn register(&self, reg: Register) -> u16 {
        self.state().registers[reg as usize - 0x10]
    }

    pub fn set_register(&self, reg: Register, value: u16) {
        self.state().registers[reg as usize - 0x10] = value;
    }

    pub fn strobe_count(&self, cmd: Strobe) -> usize {
        self.state().strobes.iter().filter(|s| **s == cmd).count()
    }
}

impl Hardware for MockRadio {
    type Error = Infallible;

    fn strobe(&mut self, cmd: Strobe) -> Result<Status, Self::Error> {
        let mut s = self.state();
        s.strobes.push(cmd);

        match cmd {
            Strobe::FlushRx => {
                s.rx_fifo.clear();
                s.overflow = false;
            },
            Strobe::FlushTx => s.tx_fifo.clear(),
            Strobe::TxOnCca if s.sfd_never => (),
            Strobe::TxOnCca if s.receiving => {
                s.sfd = true;
            },
            Strobe::TxOnCca if s.channel_clear => {
                let frame = s.tx_fifo.clone();
                s.sent.push(frame);
                s.sfd = true;
                s.tx_status_reads = 1;
                s.status.insert(Status::TX_ACTIVE);
            },
            _ => (),
        }

        Ok(s.status)
    }

    fn read_register(&mut self, reg: Register) -> Result<u16, Self::Error> {
        Ok(self.register(reg))
    }

    fn write_register(&mut self, reg: Register, value: u16) -> Result<(), Self::Error> {
        self.set_register(reg, value);
        Ok(())
    }

    fn read_status(&mut self) -> Result<Status, Self::Error> {
        let mut s = self.state();
        let status = s.status;

        // Transmissions complete after being observed once
        if s.tx_status_reads > 0 {
            s.tx_status_reads -= 1;
        } else if !s.stuck_tx && s.status.contains(Status::TX_ACTIVE) {
            s.status.remove(Status::TX_ACTIVE);
            s.sfd = false;
        }

        Ok(status)
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        let mut s = self.state();
        for b in buf.iter_mut() {
            *b = s.rx_fifo.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn read_fifo_byte(&mut self) -> Result<u8, Self::Error> {
        Ok(self.state().rx_fifo.pop_front().unwrap_or(0))
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.state().tx_fifo.extend_from_slice(data);
        Ok(())
    }

    fn write_ram(&mut self, addr: RamAddress, data: &[u8]) -> Result<(), Self::Error> {
        self.state().ram.push((addr, data.to_vec()));
        Ok(())
    }

    fn fifop(&mut self) -> bool {
        let s = self.state();
        s.overflow || !s.rx_fifo.is_empty()
    }

    fn fifo(&mut self) -> bool {
        let s = self.state();
        !s.overflow && !s.rx_fifo.is_empty()
    }

    fn sfd(&mut self) -> bool {
        let mut s = self.state();
        s.sfd_reads += 1;
        s.sfd
    }

    fn cca(&mut self) -> bool {
        self.state().channel_clear
    }

    fn bus_busy(&mut self) -> bool {
        self.state().bus_busy
    }

    fn set_fifop_interrupt(&mut self, enabled: bool) {
        self.state().fifop_irq = enabled;
    }

    fn clear_fifop_interrupt(&mut self) {
        self.state().fifop_clears += 1;
    }
}
