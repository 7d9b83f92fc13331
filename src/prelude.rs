//! CC2420 link layer prelude
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

pub use crate::error::CoreError;
pub use crate::timer::{Timer as MacTimer};

pub use crate::hal::Hardware;
pub use crate::packet::{Header, Footer, Frame, BROADCAST};
pub use crate::shared::{Shared, Stats, TxContext};

pub use crate::mac::{Config as MacConfig, Core as Mac, NetworkLayer, Classification};

pub use crate::traits::RadioMode;

pub use ieee802154::mac::{PanId, ShortAddress};
