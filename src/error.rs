//! Error type shared by the codec, the link and the navigation layer.

use core::fmt;

use embedded_io_async::ErrorKind;

/// Errors produced while talking to the flight controller.
///
/// Telemetry and override tasks only log these; navigation calls return them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No byte, or not enough bytes, arrived before the deadline
    Timeout,
    /// XOR checksum computed over the frame differs from the trailing byte
    ChecksumMismatch {
        computed: u8,
        received: u8,
    },
    /// A valid frame arrived for a different command
    UnexpectedCommand {
        expected: u8,
        received: u8,
    },
    /// Payload longer than the one-byte length field allows
    PayloadTooLarge(usize),
    /// Response payload shorter than its layout
    ShortPayload {
        command: u8,
        len: usize,
    },
    /// The flight controller answered with an error frame (`$M!`)
    Rejected(u8),
    /// Mode name missing from the configured mode table
    UnknownMode,
    /// Latitude/longitude have never been reported with a valid fix
    NoPositionFix,
    /// Channel index outside 1..=MAX_CHANNELS
    InvalidChannel(u8),
    /// Pulse width outside [1000, 2000] µs
    ChannelOutOfRange {
        channel: u8,
        value: u16,
    },
    /// Rejected configuration value
    InvalidConfig(&'static str),
    /// Telemetry polling has stopped, so a convergence wait cannot finish
    Stopped,
    /// Transport reached end of stream or was taken out of the link
    TransportClosed,
    /// Transport read/write failure
    Transport(ErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "Timed out waiting for MSP frame"),
            Error::ChecksumMismatch { computed, received } => write!(
                f,
                "MSP checksum mismatch: computed 0x{:02x}, received 0x{:02x}",
                computed, received
            ),
            Error::UnexpectedCommand { expected, received } => write!(
                f,
                "Unexpected MSP command {} (expected {})",
                received, expected
            ),
            Error::PayloadTooLarge(len) => {
                write!(f, "MSP payload of {} bytes exceeds 255", len)
            }
            Error::ShortPayload { command, len } => {
                write!(f, "MSP command {}: payload too short ({} bytes)", command, len)
            }
            Error::Rejected(command) => {
                write!(f, "Flight controller rejected MSP command {}", command)
            }
            Error::UnknownMode => write!(f, "Unknown flight mode"),
            Error::NoPositionFix => write!(f, "No GPS position available"),
            Error::InvalidChannel(ch) => write!(f, "Invalid RC channel {}", ch),
            Error::ChannelOutOfRange { channel, value } => write!(
                f,
                "RC channel {}: {} µs outside [1000, 2000]",
                channel, value
            ),
            Error::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
            Error::Stopped => write!(f, "Telemetry polling stopped"),
            Error::TransportClosed => write!(f, "Transport closed"),
            Error::Transport(kind) => write!(f, "Transport error: {:?}", kind),
        }
    }
}

impl core::error::Error for Error {}

/// Map a transport error onto [`Error::Transport`].
pub(crate) fn transport<E: embedded_io_async::Error>(e: E) -> Error {
    Error::Transport(e.kind())
}
