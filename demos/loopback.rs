//! Two simulated CC2420 nodes exchanging unicast frames
//!
//! Frames sent by node A are delivered to node B, which acknowledges them
//! unless the simulated channel drops the frame or the ACK.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use std::time::{Duration, Instant};

use log::{debug, info, warn, error};

use structopt::StructOpt;

use rand::{Rng, SeedableRng, rngs::StdRng};

use lpwan_cc2420::prelude::*;
use lpwan_cc2420::mock::MockRadio;
use lpwan_cc2420::shared::RxState;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "10")]
    /// Number of frames to send
    pub count: usize,

    #[structopt(long, default_value = "200ms")]
    /// Interval between new frames
    pub period: humantime::Duration,

    #[structopt(long, default_value = "32ms")]
    /// Delay between retransmissions
    pub retry_interval: humantime::Duration,

    #[structopt(long, default_value = "0.3")]
    /// Probability of losing a frame or acknowledgment
    pub loss: f64,

    #[structopt(long, default_value = "1")]
    /// Seed for loss and jitter
    pub seed: u64,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

#[derive(Clone, Debug)]
pub struct SystemTimer {
    start: Instant,
}

impl SystemTimer {
    fn new() -> Self {
        Self {
            start: Instant::now()
        }
    }
}

impl MacTimer for SystemTimer {
    fn ticks_ms(&self) -> u64 {
        Instant::now().duration_since(self.start).as_millis() as u64
    }

    fn ticks_us(&self) -> u64 {
        Instant::now().duration_since(self.start).as_micros() as u64
    }
}

/// Network layer printing received payloads
struct Printer(&'static str);

impl NetworkLayer for Printer {
    fn on_frame_received(&mut self, frame: &Frame) {
        info!("{}: received {:02x?} from {:04x} (seq {} rssi {} lqi {})",
            self.0, frame.payload(), frame.header.src.0, frame.header.seq, frame.rssi(), frame.lqi());
    }
}

const ADDR_A: ShortAddress = ShortAddress(0x0001);
const ADDR_B: ShortAddress = ShortAddress(0x0002);
const PAN: PanId = PanId(0x0100);

fn main() -> anyhow::Result<()> {
    let opts = Options::from_args();

    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting cc2420 loopback");

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let loss = opts.loss.max(0.0).min(1.0);

    let config = MacConfig {
        retry_interval_ms: opts.retry_interval.as_millis() as u32,
        ..Default::default()
    };

    let (radio_a, radio_b) = (MockRadio::new(), MockRadio::new());
    let (shared_a, shared_b) = (Shared::new(radio_a.clone()), Shared::new(radio_b.clone()));

    let timer = SystemTimer::new();

    let mut a: Mac<_, _, _> = Mac::new(&shared_a, config.clone(), timer.clone(), StdRng::seed_from_u64(opts.seed + 1));
    let mut b: Mac<_, _, _> = Mac::new(&shared_b, config, timer.clone(), StdRng::seed_from_u64(opts.seed + 2));

    for (mac, addr) in [(&mut a, ADDR_A), (&mut b, ADDR_B)] {
        mac.init().map_err(|e| anyhow::anyhow!("Init error: {:?}", e))?;
        mac.set_channel_pan_addr(26, PAN, addr, None).map_err(|e| anyhow::anyhow!("Address error: {:?}", e))?;
        mac.on().map_err(|e| anyhow::anyhow!("Radio on error: {:?}", e))?;
    }

    let (mut upper_a, mut upper_b) = (Printer("A"), Printer("B"));
    let footer = Footer{ rssi: -60, correlation: 100, crc_ok: true };

    let period: Duration = opts.period.into();
    let mut last_tx = Instant::now() - period;
    let mut sent = 0;

    while sent < opts.count || a.next_deadline_us().is_some() {
        if sent < opts.count && last_tx.elapsed() >= period {
            let data = [0xaa, 0xbb, sent as u8];

            match a.send(Header::data(ADDR_B, ADDR_A), &data) {
                Ok(_) => debug!("A: sent frame {}", sent),
                Err(CoreError::ChannelBusy) => warn!("A: channel busy, retrying"),
                Err(e) => error!("A: send error: {:?}", e),
            }

            sent += 1;
            last_tx = Instant::now();
        }

        // Simulated channel from A to B, with hardware ACKs back
        for f in radio_a.take_sent() {
            if rng.gen_bool(loss) {
                info!("Channel: frame lost");
                continue;
            }

            radio_b.receive(&f[1..], footer);

            if rng.gen_bool(loss) {
                info!("Channel: ACK lost");
                continue;
            }

            if let Some(h) = Header::decode(&f[1..]) {
                radio_a.receive(&[0x02, 0x00, h.seq], footer);
            }
        }

        for (shared, name) in [(&shared_a, "A"), (&shared_b, "B")] {
            if shared.rx_state() == RxState::HeaderPending {
                if let Err(e) = shared.handle_interrupt() {
                    error!("{}: interrupt error: {:?}", name, e);
                }
            }
        }

        if let Err(e) = a.poll(&mut upper_a) {
            error!("A: poll error: {:?}", e);
        }
        if let Err(e) = b.poll(&mut upper_b) {
            error!("B: poll error: {:?}", e);
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    info!("Neighbour B is {}", a.check_remote(ADDR_B));
    if let Some(n) = a.neighbours().get(ADDR_B) {
        info!("Neighbour B score {} expire {}", n.score, n.expire);
    }

    info!("A stats: {:?}", a.stats());
    info!("B stats: {:?}", b.stats());

    Ok(())
}
