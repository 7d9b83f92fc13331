//! Medium Access Control (MAC) layer module.
//! CSMA-CA transmission, deferred reception, retransmission and neighbour quality.

pub mod config;
pub use config::Config;

pub mod core;
pub use self::core::Core;

pub mod csma;

pub mod rx;
pub use rx::NetworkLayer;

pub mod retransmit;
pub use retransmit::{RetransmitEvent, RetransmitState, Round};

pub mod neighbours;
pub use neighbours::{Classification, Neighbour, NeighbourTable};
