
/// Minimum safe interval between retransmission attempts
pub const MIN_RETRY_INTERVAL_MS: u32 = 4;

/// Configuration for the link layer
#[derive(Clone, PartialEq, Debug)]
pub struct Config {
    /// Number of retransmissions for unicast frames
    pub max_retransmissions: u8,

    /// Delay between transmission attempts in milliseconds
    pub retry_interval_ms: u32,

    /// Upper bound on attempts per frame, covers rounds where the channel was busy
    pub max_rounds: u8,

    /// Upper bound on the random delay before each broadcast attempt, in microseconds
    pub broadcast_jitter_us: u32,

    /// Scaled retransmission score at or above which a neighbour is remote
    pub remote_threshold: u8,

    /// Seconds between neighbour table aging passes
    pub aging_interval_s: u32,

    /// SFD poll iterations after a transmit-on-CCA strobe (about 20 symbols / 320 us)
    pub cca_poll_iterations: u32,

    /// Bound for hardware status polling loops
    pub status_poll_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retransmissions: 3,
            retry_interval_ms: 32,
            max_rounds: 16,
            broadcast_jitter_us: 2048,

            remote_threshold: 3 * 4,
            aging_interval_s: 10,

            cca_poll_iterations: 100,
            status_poll_limit: 10_000,
        }
    }
}

impl Config {
    /// Retry interval bounded below by the minimum re-arm time
    pub fn retry_interval_ms(&self) -> u32 {
        self.retry_interval_ms.max(MIN_RETRY_INTERVAL_MS)
    }
}
