//! Simulated flight controller speaking MSP v1 over an in-memory byte pipe.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::task::Poll;

use embassy_time::{Duration, Instant};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use msp_pilot::drivers::msp::{self, Direction};
use msp_pilot::Command;

/// A request frame the flight controller received.
#[derive(Clone, Debug)]
pub struct Received {
    pub at: Instant,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Received {
    /// Channel values of an `MSP_SET_RAW_RC` payload, channel 1 first.
    pub fn channels(&self) -> Vec<u16> {
        self.payload
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }
}

type AltitudeFeed = Box<dyn Fn(Duration) -> i32>;

pub struct SimState {
    start: Instant,
    /// Bytes waiting for the client to read
    outbox: VecDeque<u8>,
    /// Bytes written by the client, not yet parsed
    inbox: Vec<u8>,
    pub received: Vec<Received>,
    pub responses: HashMap<u8, Vec<u8>>,
    /// Commands answered with a bad checksum
    pub corrupt: HashSet<u8>,
    /// Commands never answered
    pub silent: HashSet<u8>,
    /// Commands answered with an error frame
    pub rejected: HashSet<u8>,
    /// Altitude in cm as a function of time since the simulator started
    pub altitude: Option<AltitudeFeed>,
}

impl SimState {
    fn handle(&mut self, command: u8, payload: Vec<u8>) {
        self.received.push(Received {
            at: Instant::now(),
            command,
            payload,
        });

        if self.silent.contains(&command) {
            return;
        }
        if self.rejected.contains(&command) {
            self.reply(Direction::Error, command, &[]);
            return;
        }
        // Set commands get an empty acknowledgement
        if command == Command::SetRawRc.id() || command == Command::SetWp.id() {
            self.reply(Direction::Response, command, &[]);
            return;
        }

        let payload = match (&self.altitude, command == Command::Altitude.id()) {
            (Some(feed), true) => altitude_payload(feed(self.start.elapsed()), 0),
            _ => match self.responses.get(&command) {
                Some(payload) => payload.clone(),
                None => return,
            },
        };
        self.reply(Direction::Response, command, &payload);
    }

    fn reply(&mut self, direction: Direction, command: u8, payload: &[u8]) {
        let mut frame = msp::encode(direction, command, payload).unwrap().to_vec();
        if self.corrupt.contains(&command) {
            if let Some(last) = frame.last_mut() {
                *last ^= 0xff;
            }
        }
        self.outbox.extend(frame);
    }

    /// Pull complete `$M<` frames out of the inbox.
    fn parse_inbox(&mut self) {
        loop {
            let Some(start) = self.inbox.windows(3).position(|w| w == b"$M<") else {
                let keep = self.inbox.len().saturating_sub(2);
                self.inbox.drain(..keep);
                return;
            };
            let buf = &self.inbox[start..];
            if buf.len() < 6 || buf.len() < 6 + buf[3] as usize {
                return;
            }
            let len = buf[3] as usize;
            let command = buf[4];
            let payload = buf[5..5 + len].to_vec();
            assert_eq!(
                buf[5 + len],
                msp::checksum(len as u8, command, &payload),
                "client sent a bad checksum"
            );
            self.inbox.drain(..start + 6 + len);
            self.handle(command, payload);
        }
    }
}

/// Transport handed to the client. Clones share the same simulator.
#[derive(Clone)]
pub struct SimFc {
    state: Rc<RefCell<SimState>>,
}

impl SimFc {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                start: Instant::now(),
                outbox: VecDeque::new(),
                inbox: Vec::new(),
                received: Vec::new(),
                responses: HashMap::new(),
                corrupt: HashSet::new(),
                silent: HashSet::new(),
                rejected: HashSet::new(),
                altitude: None,
            })),
        }
    }

    /// A healthy, disarmed vehicle on the ground with a 3D fix.
    pub fn healthy() -> Self {
        let sim = Self::new();
        sim.respond(Command::Attitude, attitude_payload(0, 0, 900));
        sim.respond(
            Command::RawGps,
            gps_payload(3, 12, 473_977_419, 85_455_938, 4_880),
        );
        sim.respond(Command::Altitude, altitude_payload(0, 0));
        sim.respond(Command::Analog, analog_payload(126, 0));
        sim.respond(Command::Rc, rc_payload(&[1500; 8]));
        sim.respond(Command::Status, status_payload(0x23, 0));
        sim
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn respond(&self, command: Command, payload: Vec<u8>) {
        self.with(|s| s.responses.insert(command.id(), payload));
    }

    pub fn received(&self, command: Command) -> Vec<Received> {
        self.with(|s| {
            s.received
                .iter()
                .filter(|r| r.command == command.id())
                .cloned()
                .collect()
        })
    }

    /// Queue a reply the client never asked for, as if an earlier request's
    /// answer turned up after that request gave up.
    pub fn queue_late_reply(&self, command: Command, payload: &[u8]) {
        self.with(|s| s.reply(Direction::Response, command.id(), payload));
    }

    /// Queue an unsolicited error frame for `command`.
    pub fn queue_late_error(&self, command: Command) {
        self.with(|s| s.reply(Direction::Error, command.id(), &[]));
    }

    pub fn clear_received(&self) {
        self.with(|s| s.received.clear());
    }
}

impl ErrorType for SimFc {
    type Error = ErrorKind;
}

impl Read for SimFc {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        core::future::poll_fn(|cx| {
            let mut state = self.state.borrow_mut();
            if state.outbox.is_empty() || buf.is_empty() {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            let n = buf.len().min(state.outbox.len());
            for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
                *slot = byte;
            }
            Poll::Ready(Ok(n))
        })
        .await
    }
}

impl Write for SimFc {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        state.inbox.extend_from_slice(buf);
        state.parse_inbox();
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ── Response payloads ─────────────────────────────────────────────────────────

/// Tenths of a degree.
pub fn attitude_payload(roll: i16, pitch: i16, yaw: i16) -> Vec<u8> {
    [roll, pitch, yaw].iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Coordinates in 1e-7 degrees, altitude in cm; speed 0, course 0, HDOP 1.5.
pub fn gps_payload(fix: u8, sats: u8, lat: i32, lon: i32, alt_cm: i16) -> Vec<u8> {
    let mut p = vec![fix, sats];
    p.extend_from_slice(&lat.to_le_bytes());
    p.extend_from_slice(&lon.to_le_bytes());
    p.extend_from_slice(&alt_cm.to_le_bytes());
    p.extend_from_slice(&0i16.to_le_bytes());
    p.extend_from_slice(&0i16.to_le_bytes());
    p.extend_from_slice(&150u16.to_le_bytes());
    p
}

pub fn altitude_payload(alt_cm: i32, vario_cms: i16) -> Vec<u8> {
    let mut p = alt_cm.to_le_bytes().to_vec();
    p.extend_from_slice(&vario_cms.to_le_bytes());
    p
}

pub fn analog_payload(decivolts: u8, mah_drawn: u16) -> Vec<u8> {
    let mut p = vec![decivolts];
    p.extend_from_slice(&mah_drawn.to_le_bytes());
    p.extend_from_slice(&0u16.to_le_bytes());
    p.extend_from_slice(&0u16.to_le_bytes());
    p
}

pub fn rc_payload(channels: &[u16]) -> Vec<u8> {
    channels.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn status_payload(sensors: u16, flags: u32) -> Vec<u8> {
    let mut p = 2000u16.to_le_bytes().to_vec();
    p.extend_from_slice(&0u16.to_le_bytes());
    p.extend_from_slice(&sensors.to_le_bytes());
    p.extend_from_slice(&flags.to_le_bytes());
    p.push(0);
    p
}
