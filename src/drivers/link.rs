//! Exclusive access to the serial transport.
//!
//! Every frame write, and every request/response pair, runs with the transport
//! locked, so the poll and override tasks never interleave bytes on the wire.
//! The lock is released between exchanges; nothing sleeps while holding it.
//!
//! Frames for other commands can still be queued when a request runs: the
//! empty acknowledgements iNav sends for `MSP_SET_RAW_RC` and `MSP_SET_WP`,
//! which `send` never reads, and replies that arrived after their own request
//! had timed out. `request` discards those and keeps reading until its own
//! reply or the deadline.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant};
use embedded_io_async::{Read, Write};

use crate::drivers::msp::{self, Direction, Payload};
use crate::drivers::msp_defines::Command;
use crate::error::{self, Error};

pub struct Link<T> {
    port: Mutex<CriticalSectionRawMutex, Option<T>>,
}

impl<T: Read + Write> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            port: Mutex::new(Some(transport)),
        }
    }

    /// Write one request-direction frame. No response is read.
    pub async fn send(&self, command: Command, payload: &[u8]) -> Result<(), Error> {
        let frame = msp::encode(Direction::Request, command.id(), payload)?;
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(Error::TransportClosed)?;
        write_frame(port, &frame).await?;
        trace!("msp: sent cmd {} ({} bytes)", command.id(), payload.len());
        Ok(())
    }

    /// Send an empty request and read the matching response, holding the
    /// transport for the whole exchange.
    pub async fn request(&self, command: Command, timeout: Duration) -> Result<Payload, Error> {
        let frame = msp::encode(Direction::Request, command.id(), &[])?;
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(Error::TransportClosed)?;
        write_frame(port, &frame).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match msp::decode(port, Direction::Response, Some(command.id()), remaining).await {
                Ok(response) => {
                    trace!(
                        "msp: cmd {} answered with {} bytes",
                        command.id(),
                        response.payload.len()
                    );
                    return Ok(response.payload);
                }
                Err(Error::UnexpectedCommand { received, .. }) => {
                    trace!("msp: skipped stale reply to cmd {}", received);
                }
                Err(Error::Rejected(received)) if received != command.id() => {
                    trace!("msp: skipped stale error frame for cmd {}", received);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the transport out. Waits for any exchange in flight.
    pub async fn close(&self) -> Option<T> {
        self.port.lock().await.take()
    }

    pub fn into_inner(self) -> Option<T> {
        self.port.into_inner()
    }
}

async fn write_frame<T: Write>(port: &mut T, frame: &[u8]) -> Result<(), Error> {
    port.write_all(frame).await.map_err(error::transport)?;
    port.flush().await.map_err(error::transport)
}
