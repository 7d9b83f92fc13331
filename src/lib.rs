//! CC2420-class 802.15.4 link layer
//!
//! Turns a register / FIFO radio interface and a single frame-pending interrupt
//! into a CSMA-CA link with bounded unicast retries, an interrupt-deferred receive
//! path, and a neighbour table inferring which peers are one reliable hop away.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

#![no_std]

#[cfg(any(test, feature="std"))]
extern crate std;

pub(crate) mod log;

pub mod timer;

pub mod hal;

pub mod packet;

pub mod shared;

pub mod mac;

pub mod traits;

pub mod error;

pub mod prelude;

#[cfg(any(test, feature="mocks"))]
pub mod mock;

/// Timestamps are 64-bit, in milliseconds unless otherwise noted
pub type Ts = u64;
