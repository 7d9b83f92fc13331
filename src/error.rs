
/// Link layer errors, generic over the underlying hardware error
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreError<E> {
    /// Header + payload + footer exceed the maximum on-air frame length
    FrameTooLarge,

    /// Receiver is administratively off, CCA is not possible
    RadioOff,

    /// Channel assessed as occupied, transmission never started
    ChannelBusy,

    /// Bounded hardware status wait expired
    Timeout,

    /// Channel outside of the 2.4 GHz band (11..=26)
    InvalidChannel(u8),

    /// Wrapper for underlying hardware / bus errors
    Hardware(E),
}
