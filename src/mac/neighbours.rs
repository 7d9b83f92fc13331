//! Neighbour quality table
//!
//! Retransmission counts are smoothed (alpha = 1/2) and stored as fixed point
//! scores with 2 binary fractional bits. Neighbours that keep needing retries
//! are classified as remote, ones reached first time as local. Entries expire
//! after 30 s without an update.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use ieee802154::mac::ShortAddress;

use crate::Ts;
use crate::log::trace;

use super::config::Config;

/// Fixed point scale applied to retransmission counts
pub const SCALE_RETRANS: u8 = 4;

/// Maximum score, a neighbour that needed every retransmission
pub const MAX_SCALE_RETRANS: u8 = 15;

/// Expiry in ticks of [`EXPIRE_TICK_S`]
pub const MAX_EXPIRE: u8 = 15;

pub const EXPIRE_TICK_S: u64 = 2;

/// Address marking an empty slot
pub const UNUSED: ShortAddress = ShortAddress(0xffff);

#[derive(Debug, Clone, Copy, PartialEq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Classification {
    /// Within reliable single-hop range
    Local,
    /// Weak or multi-hop link
    Remote,
    /// Not in the table
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub address: ShortAddress,
    /// Smoothed retransmission score, `0..=MAX_SCALE_RETRANS`
    pub score: u8,
    /// Remaining lifetime in expiry ticks
    pub expire: u8,
}

impl Neighbour {
    const EMPTY: Neighbour = Neighbour {
        address: UNUSED,
        score: 0,
        expire: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.address == UNUSED
    }
}

/// Slots visited when looking up `address` in a table of `N` slots
///
/// The base slot is followed by two probes with an address derived step.
pub fn probe_sequence<const N: usize>(address: ShortAddress) -> [usize; 3] {
    let a = address.0 as usize;
    let step = ((a >> 9) & 0x3) + 1;

    let h0 = (a + (a >> 8)) % N;
    let h1 = (h0 + step) % N;
    let h2 = (h1 + step) % N;

    [h0, h1, h2]
}

/// Fixed capacity neighbour table with `N` slots
#[derive(Debug, Clone, PartialEq)]
pub struct NeighbourTable<const N: usize = 16> {
    entries: [Neighbour; N],

    max_retransmissions: u8,
    remote_threshold: u8,
    aging_ticks: u64,

    last_aged: Ts,
}

impl <const N: usize> NeighbourTable<N> {
    pub fn new(config: &Config, now_ms: Ts) -> Self {
        Self {
            entries: [Neighbour::EMPTY; N],
            max_retransmissions: config.max_retransmissions,
            remote_threshold: config.remote_threshold,
            aging_ticks: (config.aging_interval_s as u64 / EXPIRE_TICK_S).max(1),
            last_aged: now_ms,
        }
    }

    /// Slot holding `address`, or the probed slot with the smallest expiry
    pub fn lookup(&self, address: ShortAddress) -> usize {
        let probes = probe_sequence::<N>(address);
        let mut oldest = probes[0];

        for &p in probes.iter() {
            if self.entries[p].address == address {
                return p;
            }
            if self.entries[p].expire < self.entries[oldest].expire {
                oldest = p;
            }
        }

        oldest
    }

    /// Record the number of retransmissions needed to reach `address`
    pub fn update(&mut self, address: ShortAddress, retransmissions: u8) {
        if address == UNUSED {
            return;
        }

        let score = if retransmissions >= self.max_retransmissions {
            MAX_SCALE_RETRANS
        } else {
            retransmissions.saturating_mul(SCALE_RETRANS).min(MAX_SCALE_RETRANS)
        };

        let slot = self.lookup(address);
        let e = &mut self.entries[slot];

        if e.address != address {
            if !e.is_empty() {
                trace!("Evicting neighbour {} for {}", e.address.0, address.0);
            }
            e.address = address;
            e.score = score;
        } else {
            e.score = ((e.score + score) / 2).min(MAX_SCALE_RETRANS);
        }

        e.expire = MAX_EXPIRE;

        trace!("Neighbour {} score {} (slot {})", address.0, e.score, slot);
    }

    /// Decrement expiry of every entry if an aging interval has passed
    pub fn age(&mut self, now_ms: Ts) {
        let elapsed = now_ms.saturating_sub(self.last_aged) / 1000 / EXPIRE_TICK_S;
        if elapsed < self.aging_ticks {
            return;
        }

        for e in self.entries.iter_mut() {
            if e.expire as u64 >= elapsed {
                e.expire -= elapsed as u8;
            } else {
                *e = Neighbour::EMPTY;
            }
        }

        self.last_aged = now_ms;
    }

    /// Age the table then classify `address`
    pub fn classify(&mut self, address: ShortAddress, now_ms: Ts) -> Classification {
        self.age(now_ms);

        if address == UNUSED {
            return Classification::Unknown;
        }

        let e = &self.entries[self.lookup(address)];
        if e.address != address {
            Classification::Unknown
        } else if e.score >= self.remote_threshold {
            Classification::Remote
        } else {
            Classification::Local
        }
    }

    pub fn get(&self, address: ShortAddress) -> Option<&Neighbour> {
        if address == UNUSED {
            return None;
        }
        let e = &self.entries[self.lookup(address)];
        if e.address == address {
            Some(e)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item=&Neighbour> {
        self.entries.iter().filter(|e| !e.is_empty())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}
