//! MSP command ids and the little-endian payload layouts this client reads and writes.
//!
//! Response parsers return the scaled telemetry types from `state`; command
//! builders return fixed-size byte arrays ready for the link.

use crate::error::Error;
use crate::state::{
    AltitudeState, ArmingFlags, Attitude, BatteryState, ChannelMap, ChannelReadback, GpsFix,
    GpsState, SensorFlags, StatusState, MAX_CHANNELS, MIN_CHANNELS,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Status = 101,
    /// Channel values as the flight controller currently sees them
    Rc = 105,
    RawGps = 106,
    Attitude = 108,
    Altitude = 109,
    Analog = 110,
    SetRawRc = 200,
    SetWp = 209,
}

impl Command {
    pub const fn id(self) -> u8 {
        self as u8
    }
}

pub const ATTITUDE_SIZE: usize = 6;
pub const RAW_GPS_SIZE: usize = 18;
pub const ALTITUDE_SIZE: usize = 6;
pub const ANALOG_SIZE: usize = 7;
pub const STATUS_SIZE: usize = 11;
pub const SET_WP_SIZE: usize = 21;
pub const SET_RAW_RC_MAX_SIZE: usize = MAX_CHANNELS * 2;

pub type RawRcPayload = heapless::Vec<u8, SET_RAW_RC_MAX_SIZE>;

/// Waypoint action: plain navigation point
pub const WP_ACTION_WAYPOINT: u8 = 1;
/// Waypoint slot iNav follows in GCS navigation mode
pub const WP_SLOT_GCS: u8 = 255;

// ── Little-endian field readers ───────────────────────────────────────────────

fn u16_at(p: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([p[i], p[i + 1]])
}

fn i16_at(p: &[u8], i: usize) -> i16 {
    i16::from_le_bytes([p[i], p[i + 1]])
}

fn i32_at(p: &[u8], i: usize) -> i32 {
    i32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]])
}

fn u32_at(p: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]])
}

fn require(command: Command, payload: &[u8], size: usize) -> Result<(), Error> {
    if payload.len() < size {
        return Err(Error::ShortPayload {
            command: command.id(),
            len: payload.len(),
        });
    }
    Ok(())
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// `i16 roll, i16 pitch, i16 yaw`, all in tenths of a degree.
pub fn parse_attitude(payload: &[u8]) -> Result<Attitude, Error> {
    require(Command::Attitude, payload, ATTITUDE_SIZE)?;
    Ok(Attitude {
        roll: i16_at(payload, 0) as f32 / 10.0,
        pitch: i16_at(payload, 2) as f32 / 10.0,
        yaw: i16_at(payload, 4) as f32 / 10.0,
    })
}

/// Decoded raw GPS fields. Position is only trusted by the store with a fix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawGps {
    pub fix: GpsFix,
    pub sats: u8,
    pub lat: f64,
    pub lon: f64,
    pub alt: f32,
    pub speed: f32,
    pub ground_course: f32,
    pub hdop: f32,
}

impl RawGps {
    /// Fix of at least 2D with non-zero coordinates.
    pub fn has_position(&self) -> bool {
        self.fix.has_position() && !(self.lat == 0.0 && self.lon == 0.0)
    }

    /// Merge into the previous GPS state; position is kept when this sample has none.
    pub fn apply(&self, previous: GpsState) -> GpsState {
        let mut next = GpsState {
            fix: self.fix,
            sats: self.sats,
            speed: self.speed,
            ground_course: self.ground_course,
            hdop: self.hdop,
            ..previous
        };
        if self.has_position() {
            next.lat = Some(self.lat);
            next.lon = Some(self.lon);
            next.alt = Some(self.alt);
        }
        next
    }
}

/// `u8 fix, u8 sats, i32 lat, i32 lon, i16 alt_cm, i16 speed_cms, i16 course_decideg, u16 hdop_centi`
pub fn parse_raw_gps(payload: &[u8]) -> Result<RawGps, Error> {
    require(Command::RawGps, payload, RAW_GPS_SIZE)?;
    Ok(RawGps {
        fix: GpsFix::from(payload[0]),
        sats: payload[1],
        lat: i32_at(payload, 2) as f64 / 1e7,
        lon: i32_at(payload, 6) as f64 / 1e7,
        alt: i16_at(payload, 10) as f32 / 100.0,
        speed: i16_at(payload, 12) as f32 / 100.0,
        ground_course: i16_at(payload, 14) as f32 / 10.0,
        hdop: u16_at(payload, 16) as f32 / 100.0,
    })
}

/// `i32 alt_cm, i16 vario_cms`
pub fn parse_altitude(payload: &[u8]) -> Result<AltitudeState, Error> {
    require(Command::Altitude, payload, ALTITUDE_SIZE)?;
    Ok(AltitudeState {
        estimated_alt: i32_at(payload, 0) as f32 / 100.0,
        vario: i16_at(payload, 4) as f32,
    })
}

/// `u8 vbat_decivolt, u16 mah_drawn, u16 rssi, u16 amps`
pub fn parse_analog(payload: &[u8]) -> Result<BatteryState, Error> {
    require(Command::Analog, payload, ANALOG_SIZE)?;
    Ok(BatteryState {
        voltage: payload[0] as f32 / 10.0,
        mah_drawn: u16_at(payload, 1),
        rssi: u16_at(payload, 3),
        amps: u16_at(payload, 5),
    })
}

/// `u16` per channel, channel 1 first. At least 8 channels; extras past
/// `MAX_CHANNELS` are dropped.
pub fn parse_rc(payload: &[u8]) -> Result<ChannelReadback, Error> {
    require(Command::Rc, payload, MIN_CHANNELS * 2)?;
    let count = (payload.len() / 2).min(MAX_CHANNELS);
    let mut readback = ChannelReadback::default();
    for (i, slot) in readback.channels.iter_mut().take(count).enumerate() {
        *slot = u16_at(payload, i * 2);
    }
    readback.count = count as u8;
    Ok(readback)
}

/// `u16 cycle_time, u16 i2c_errors, u16 sensors, u32 flags, u8 profile`
pub fn parse_status(payload: &[u8]) -> Result<StatusState, Error> {
    require(Command::Status, payload, STATUS_SIZE)?;
    Ok(StatusState {
        cycle_time_us: u16_at(payload, 0),
        i2c_errors: u16_at(payload, 2),
        sensors: SensorFlags::from_bits_retain(u16_at(payload, 4)),
        flags: ArmingFlags::from_bits_retain(u32_at(payload, 6)),
        profile: payload[10],
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// `u16` per channel, channel 1 first, `map.len()` channels (never fewer than 8).
pub fn payload_set_raw_rc(map: &ChannelMap) -> RawRcPayload {
    let mut buf = RawRcPayload::new();
    for value in map.values() {
        // Capacity covers MAX_CHANNELS, which bounds map.len()
        let _ = buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// One waypoint as carried by `MSP_SET_WP`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Waypoint {
    pub slot: u8,
    pub action: u8,
    /// Degrees
    pub lat: f64,
    /// Degrees
    pub lon: f64,
    /// Metres, relative to home
    pub alt: f32,
    /// Speed in cm/s, 0 = flight controller default
    pub p1: i16,
    pub p2: i16,
    /// Altitude mode bits, 0 = relative to home
    pub p3: i16,
    pub flags: u8,
}

impl Waypoint {
    /// Plain navigation waypoint in `slot`.
    pub fn new(slot: u8, lat: f64, lon: f64, alt: f32) -> Self {
        Self {
            slot,
            action: WP_ACTION_WAYPOINT,
            lat,
            lon,
            alt,
            p1: 0,
            p2: 0,
            p3: 0,
            flags: 0,
        }
    }
}

fn round_i32(v: f64) -> i32 {
    if v >= 0.0 {
        (v + 0.5) as i32
    } else {
        (v - 0.5) as i32
    }
}

/// `u8 slot, u8 action, i32 lat, i32 lon, i32 alt_cm, i16 p1, i16 p2, i16 p3, u8 flags`
pub fn payload_set_wp(wp: &Waypoint) -> [u8; SET_WP_SIZE] {
    let mut buf = [0u8; SET_WP_SIZE];
    buf[0] = wp.slot;
    buf[1] = wp.action;
    buf[2..6].copy_from_slice(&round_i32(wp.lat * 1e7).to_le_bytes());
    buf[6..10].copy_from_slice(&round_i32(wp.lon * 1e7).to_le_bytes());
    buf[10..14].copy_from_slice(&round_i32(wp.alt as f64 * 100.0).to_le_bytes());
    buf[14..16].copy_from_slice(&wp.p1.to_le_bytes());
    buf[16..18].copy_from_slice(&wp.p2.to_le_bytes());
    buf[18..20].copy_from_slice(&wp.p3.to_le_bytes());
    buf[20] = wp.flags;
    buf
}
