//! Client configuration: loop periods, timeouts and the flight-controller
//! specific channel conventions (arm switch, mode switches).

use embassy_time::Duration;

use crate::drivers::msp_defines::WP_SLOT_GCS;
use crate::error::Error;
use crate::state::{ChannelMap, MAX_CHANNELS};

// ── Timing ────────────────────────────────────────────────────────────────────

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(100);
/// 20 Hz channel override
pub const DEFAULT_OVERRIDE_PERIOD: Duration = Duration::from_millis(50);
/// iNav enters RC failsafe when MSP channel frames arrive slower than 5 Hz
pub const MAX_OVERRIDE_PERIOD: Duration = Duration::from_millis(200);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(200);
pub const DEFAULT_CONVERGENCE_INTERVAL: Duration = Duration::from_millis(200);

// ── Channel conventions ───────────────────────────────────────────────────────

/// AUX1
pub const DEFAULT_ARM_CHANNEL: u8 = 5;
pub const ARM_ON_US: u16 = 2000;
pub const ARM_OFF_US: u16 = 1000;
pub const THROTTLE_CHANNEL: u8 = 3;

pub const MODE_ANGLE: &str = "ANGLE";
pub const MODE_POSHOLD: &str = "POSHOLD";
pub const MODE_NAV_WP: &str = "NAV_WP";
pub const MODE_RTH: &str = "RTH";

pub const MAX_MODES: usize = 8;
pub const MAX_MODE_CHANNELS: usize = 4;

/// Channel/value pairs a mode switch applies.
pub type ModeChannels = heapless::Vec<(u8, u16), MAX_MODE_CHANNELS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeEntry {
    pub name: &'static str,
    pub channels: ModeChannels,
}

/// Mode name → channel values, as set up in the flight controller's Modes tab.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeTable {
    entries: heapless::Vec<ModeEntry, MAX_MODES>,
}

impl Default for ModeTable {
    /// AUX2 (channel 6) three-position switch for ANGLE / POSHOLD / NAV_WP,
    /// AUX3 (channel 7) for RTH. The non-RTH modes drop channel 7 low so that
    /// leaving RTH actually leaves it.
    fn default() -> Self {
        let mut table = Self::new();
        for (name, channels) in [
            (MODE_ANGLE, &[(6, 1200), (7, 1000)][..]),
            (MODE_POSHOLD, &[(6, 1500), (7, 1000)][..]),
            (MODE_NAV_WP, &[(6, 1800), (7, 1000)][..]),
            (MODE_RTH, &[(7, 1800)][..]),
        ] {
            // Four entries of at most two channels, within both capacities
            let _ = table.insert(name, channels);
        }
        table
    }
}

impl ModeTable {
    pub fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Add a mode, or replace the channels of an existing one.
    pub fn insert(&mut self, name: &'static str, channels: &[(u8, u16)]) -> Result<(), Error> {
        for &(channel, value) in channels {
            ChannelMap::check(channel, value)?;
        }
        let channels = ModeChannels::from_slice(channels)
            .map_err(|_| Error::InvalidConfig("too many channels for one mode"))?;

        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.channels = channels;
            return Ok(());
        }
        self.entries
            .push(ModeEntry { name, channels })
            .map_err(|_| Error::InvalidConfig("mode table full"))
    }

    pub fn with_mode(mut self, name: &'static str, channels: &[(u8, u16)]) -> Result<Self, Error> {
        self.insert(name, channels)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ModeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModeEntry> {
        self.entries.iter()
    }
}

// ── Client configuration ──────────────────────────────────────────────────────

/// Altitude reading `climb_to` converges on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AltitudeSource {
    /// Barometer/accelerometer estimate from `MSP_ALTITUDE`, relative to arming
    #[default]
    Estimated,
    /// GPS altitude above sea level from `MSP_RAW_GPS`. Never converges
    /// without a fix.
    Gps,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Telemetry poll cycle
    pub poll_period: Duration,
    /// Channel override cadence, at most `MAX_OVERRIDE_PERIOD`
    pub override_period: Duration,
    /// Deadline for one request/response exchange
    pub request_timeout: Duration,
    /// Also poll MSP_STATUS each cycle (armed bit, arming flags)
    pub poll_status: bool,
    pub arm_channel: u8,
    /// Applied over the all-neutral map at startup
    pub initial_channels: heapless::Vec<(u8, u16), MAX_CHANNELS>,
    pub modes: ModeTable,
    /// Waypoint slot used by `go_to`
    pub waypoint_slot: u8,
    /// Sleep between altitude checks in `climb_to`
    pub convergence_interval: Duration,
    pub climb_altitude_source: AltitudeSource,
    /// Metres
    pub land_altitude: f32,
    /// Metres
    pub land_tolerance: f32,
    /// Metres
    pub takeoff_tolerance: f32,
    /// Volts, checked by `is_ready_to_arm`
    pub min_arm_voltage: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut initial_channels = heapless::Vec::new();
        // Throttle low and arm switch off until told otherwise
        let _ = initial_channels.push((THROTTLE_CHANNEL, 1000));
        let _ = initial_channels.push((DEFAULT_ARM_CHANNEL, ARM_OFF_US));

        Self {
            poll_period: DEFAULT_POLL_PERIOD,
            override_period: DEFAULT_OVERRIDE_PERIOD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_status: false,
            arm_channel: DEFAULT_ARM_CHANNEL,
            initial_channels,
            modes: ModeTable::default(),
            waypoint_slot: WP_SLOT_GCS,
            convergence_interval: DEFAULT_CONVERGENCE_INTERVAL,
            climb_altitude_source: AltitudeSource::Estimated,
            land_altitude: 0.5,
            land_tolerance: 0.5,
            takeoff_tolerance: 1.0,
            min_arm_voltage: 10.0,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_period == Duration::from_ticks(0) {
            return Err(Error::InvalidConfig("poll period must be non-zero"));
        }
        if self.override_period == Duration::from_ticks(0) {
            return Err(Error::InvalidConfig("override period must be non-zero"));
        }
        if self.override_period > MAX_OVERRIDE_PERIOD {
            return Err(Error::InvalidConfig("override rate below 5 Hz"));
        }
        if self.request_timeout == Duration::from_ticks(0) {
            return Err(Error::InvalidConfig("request timeout must be non-zero"));
        }
        ChannelMap::check(self.arm_channel, ARM_ON_US)?;
        for &(channel, value) in &self.initial_channels {
            ChannelMap::check(channel, value)?;
        }
        for mode in self.modes.iter() {
            for &(channel, value) in &mode.channels {
                ChannelMap::check(channel, value)?;
            }
        }
        if !(self.land_tolerance > 0.0 && self.takeoff_tolerance > 0.0) {
            return Err(Error::InvalidConfig("tolerances must be positive"));
        }
        Ok(())
    }

    /// Neutral map with `initial_channels` applied.
    pub fn initial_map(&self) -> Result<ChannelMap, Error> {
        let mut map = ChannelMap::default();
        map.merge(&self.initial_channels)?;
        Ok(map)
    }
}
