//! MSP v1 framing: `$M` + direction, length, command, payload, XOR checksum.
//!
//! [Reference](https://github.com/iNavFlight/inav/wiki/MSP-V2) (v1 section)

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, ReadExactError};

use crate::error::{self, Error};

pub const PREAMBLE_0: u8 = b'$';
pub const PREAMBLE_1_V1: u8 = b'M';

/// Largest payload the one-byte length field can describe
pub const MAX_PAYLOAD: usize = 255;
/// Preamble (3) + length + command + checksum
pub const METADATA_SIZE: usize = 6;
pub const MAX_FRAME: usize = MAX_PAYLOAD + METADATA_SIZE;

pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;
pub type FrameBuf = heapless::Vec<u8, MAX_FRAME>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Direction {
    /// Host → flight controller
    Request = b'<',
    /// Flight controller → host
    Response = b'>',
    /// Flight controller could not process the request
    Error = b'!',
}

impl Direction {
    pub const fn preamble(self) -> [u8; 3] {
        [PREAMBLE_0, PREAMBLE_1_V1, self as u8]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub direction: Direction,
    pub command_id: u8,
    pub payload: Payload,
}

/// XOR of length, command and every payload byte.
pub fn checksum(len: u8, command_id: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(len ^ command_id, |acc, &b| acc ^ b)
}

/// Serialize one frame.
pub fn encode(direction: Direction, command_id: u8, payload: &[u8]) -> Result<FrameBuf, Error> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge(payload.len()));
    }
    let len = payload.len() as u8;

    let mut buf = FrameBuf::new();
    // Capacity is MAX_FRAME, the length check above keeps every push in bounds
    let mut push = |bytes: &[u8]| {
        buf.extend_from_slice(bytes)
            .map_err(|_| Error::PayloadTooLarge(payload.len()))
    };
    push(&direction.preamble())?;
    push(&[len, command_id])?;
    push(payload)?;
    push(&[checksum(len, command_id, payload)])?;
    Ok(buf)
}

/// Read one frame travelling in `direction` from `src`.
///
/// Bytes are discarded until the last three seen match the preamble. Length,
/// command, payload and checksum are then read in order; every read shares the
/// same deadline, `timeout` from now. When decoding responses an error frame
/// (`$M!`) is also recognised and reported as [`Error::Rejected`].
pub async fn decode<R: Read>(
    src: &mut R,
    direction: Direction,
    expected_command: Option<u8>,
    timeout: Duration,
) -> Result<Frame, Error> {
    let deadline = Instant::now() + timeout;
    let preamble = direction.preamble();
    let error_preamble = Direction::Error.preamble();

    let mut window = [0u8; 3];
    let mut discarded = 0usize;
    let rejected = loop {
        let mut b = [0u8; 1];
        read_before(src, &mut b, deadline).await?;
        window = [window[1], window[2], b[0]];
        if window == preamble {
            break false;
        }
        if direction == Direction::Response && window == error_preamble {
            break true;
        }
        discarded += 1;
    };
    if discarded > 2 {
        trace!("msp: skipped {} bytes before preamble", discarded - 2);
    }

    let mut header = [0u8; 2];
    read_before(src, &mut header, deadline).await?;
    let [len, command_id] = header;

    let mut body = [0u8; MAX_PAYLOAD];
    let body = &mut body[..len as usize];
    read_before(src, body, deadline).await?;

    let mut received = [0u8; 1];
    read_before(src, &mut received, deadline).await?;

    let computed = checksum(len, command_id, body);
    if computed != received[0] {
        return Err(Error::ChecksumMismatch {
            computed,
            received: received[0],
        });
    }
    if rejected {
        return Err(Error::Rejected(command_id));
    }
    if let Some(expected) = expected_command {
        if expected != command_id {
            return Err(Error::UnexpectedCommand {
                expected,
                received: command_id,
            });
        }
    }

    let payload = Payload::from_slice(body).map_err(|_| Error::PayloadTooLarge(body.len()))?;
    Ok(Frame {
        direction,
        command_id,
        payload,
    })
}

/// `read_exact` raced against the frame deadline.
async fn read_before<R: Read>(src: &mut R, buf: &mut [u8], deadline: Instant) -> Result<(), Error> {
    match select(src.read_exact(buf), Timer::at(deadline)).await {
        Either::First(Ok(())) => Ok(()),
        Either::First(Err(ReadExactError::UnexpectedEof)) => Err(Error::TransportClosed),
        Either::First(Err(ReadExactError::Other(e))) => Err(error::transport(e)),
        Either::Second(()) => Err(Error::Timeout),
    }
}
