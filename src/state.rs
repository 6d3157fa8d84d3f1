//! Shared state between the poll task, the override task and the caller.
//!
//! Telemetry values are `Copy` and live in independent blocking-mutex cells:
//! a reader never waits on the link and never sees a half-written field.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::drivers::msp_defines::RawGps;
use crate::error::Error;

// ── RC channel limits ─────────────────────────────────────────────────────────

/// Channels always transmitted, padded with `NEUTRAL_US`
pub const MIN_CHANNELS: usize = 8;
/// iNav accepts at most 18 RC channels over MSP
pub const MAX_CHANNELS: usize = 18;
pub const PULSE_MIN_US: u16 = 1000;
pub const PULSE_MAX_US: u16 = 2000;
pub const NEUTRAL_US: u16 = 1500;

// ── Telemetry types ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Attitude {
    /// Degrees
    pub roll: f32,
    /// Degrees
    pub pitch: f32,
    /// Degrees
    pub yaw: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpsFix {
    #[default]
    None,
    Fix2D,
    Fix3D,
    Other(u8),
}

impl From<u8> for GpsFix {
    fn from(raw: u8) -> Self {
        match raw {
            0 => GpsFix::None,
            2 => GpsFix::Fix2D,
            3 => GpsFix::Fix3D,
            other => GpsFix::Other(other),
        }
    }
}

impl GpsFix {
    pub fn has_position(self) -> bool {
        match self {
            GpsFix::None => false,
            GpsFix::Fix2D | GpsFix::Fix3D => true,
            GpsFix::Other(raw) => raw >= 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpsState {
    /// Degrees, `None` until a fix with coordinates has been seen
    pub lat: Option<f64>,
    /// Degrees, `None` until a fix with coordinates has been seen
    pub lon: Option<f64>,
    /// Metres
    pub alt: Option<f32>,
    /// m/s
    pub speed: f32,
    /// Degrees
    pub ground_course: f32,
    pub hdop: f32,
    pub sats: u8,
    pub fix: GpsFix,
}

impl GpsState {
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AltitudeState {
    /// Flight controller's estimated altitude, metres
    pub estimated_alt: f32,
    /// cm/s
    pub vario: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryState {
    /// Volts
    pub voltage: f32,
    pub mah_drawn: u16,
    pub rssi: u16,
    /// Raw amperage as reported
    pub amps: u16,
}

/// Channel values read back from the flight controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelReadback {
    pub channels: [u16; MAX_CHANNELS],
    pub count: u8,
}

impl ChannelReadback {
    /// 1-indexed channel value.
    pub fn channel(&self, channel: u8) -> Option<u16> {
        if channel == 0 || channel > self.count {
            return None;
        }
        Some(self.channels[channel as usize - 1])
    }
}

bitflags::bitflags! {
    /// Sensors present on the flight controller.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SensorFlags: u16 {
        const ACC = 0x01;
        const BARO = 0x02;
        const MAG = 0x04;
        const GPS = 0x08;
        const RANGEFINDER = 0x10;
        const GYRO = 0x20;
    }
}

bitflags::bitflags! {
    /// Status flags as reported; reported only, never interpreted.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ArmingFlags: u32 {
        const ARMED = 0x0000_0001;
        const WAS_EVER_ARMED = 0x0000_0002;
        const DISABLED_RC_NOT_LEVEL = 0x0000_0100;
        const DISABLED_SENSORS_CALIBRATING = 0x0000_0200;
        const DISABLED_SYSTEM_OVERLOADED = 0x0000_0400;
        const DISABLED_NAVIGATION_UNSAFE = 0x0000_0800;
        const DISABLED_COMPASS_NOT_CALIBRATED = 0x0000_1000;
        const DISABLED_ACCELEROMETER_NOT_CALIBRATED = 0x0000_2000;
        const DISABLED_ARM_SWITCH = 0x0000_4000;
        const DISABLED_HARDWARE_FAILURE = 0x0000_8000;
        const DISABLED_BOXFAILSAFE = 0x0001_0000;
        const DISABLED_BOXKILLSWITCH = 0x0002_0000;
        const DISABLED_RC_LINK = 0x0004_0000;
        const DISABLED_THROTTLE = 0x0008_0000;
        const DISABLED_CLI = 0x0010_0000;
        const DISABLED_CMS_MENU = 0x0020_0000;
        const DISABLED_OSD_MENU = 0x0040_0000;
        const DISABLED_ROLLPITCH_NOT_CENTERED = 0x0080_0000;
        const DISABLED_SERVO_AUTOTRIM = 0x0100_0000;
        const DISABLED_OOM = 0x0200_0000;
        const DISABLED_INVALID_SETTING = 0x0400_0000;
        const DISABLED_PWM_OUTPUT_ERROR = 0x0800_0000;
        const DISABLED_NO_PREARM = 0x1000_0000;
        const DISABLED_DSHOTBEEPER = 0x2000_0000;
        const DISABLED_LANDING_DETECTED = 0x4000_0000;
        const DISABLED_OTHER = 0x8000_0000;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusState {
    pub cycle_time_us: u16,
    pub i2c_errors: u16,
    pub sensors: SensorFlags,
    pub flags: ArmingFlags,
    pub profile: u8,
}

impl StatusState {
    pub fn armed(&self) -> bool {
        self.flags.contains(ArmingFlags::ARMED)
    }
}

// ── Telemetry store ───────────────────────────────────────────────────────────

type Field<T> = Mutex<CriticalSectionRawMutex, Cell<T>>;

/// Last known telemetry. Written by the poll task only.
pub struct TelemetryStore {
    attitude: Field<Attitude>,
    gps: Field<GpsState>,
    altitude: Field<AltitudeState>,
    battery: Field<BatteryState>,
    rc: Field<ChannelReadback>,
    status: Field<Option<StatusState>>,
    cycles: AtomicU32,
    failures: AtomicU32,
    stopped: AtomicBool,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            attitude: Mutex::new(Cell::new(Attitude::default())),
            gps: Mutex::new(Cell::new(GpsState::default())),
            altitude: Mutex::new(Cell::new(AltitudeState::default())),
            battery: Mutex::new(Cell::new(BatteryState::default())),
            rc: Mutex::new(Cell::new(ChannelReadback::default())),
            status: Mutex::new(Cell::new(None)),
            cycles: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn attitude(&self) -> Attitude {
        self.attitude.lock(|c| c.get())
    }

    pub fn gps(&self) -> GpsState {
        self.gps.lock(|c| c.get())
    }

    pub fn altitude(&self) -> AltitudeState {
        self.altitude.lock(|c| c.get())
    }

    pub fn battery(&self) -> BatteryState {
        self.battery.lock(|c| c.get())
    }

    pub fn rc(&self) -> ChannelReadback {
        self.rc.lock(|c| c.get())
    }

    /// `None` until a status response has been decoded.
    pub fn status(&self) -> Option<StatusState> {
        self.status.lock(|c| c.get())
    }

    /// Completed poll cycles.
    pub fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Field exchanges that failed (timeout, checksum, wrong command, short payload).
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// True once polling has been stopped; the stored values no longer change.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub(crate) fn set_stopped(&self, stopped: bool) {
        self.stopped.store(stopped, Ordering::Relaxed);
    }

    pub(crate) fn set_attitude(&self, v: Attitude) {
        self.attitude.lock(|c| c.set(v));
    }

    pub(crate) fn update_gps(&self, raw: RawGps) {
        self.gps.lock(|c| c.set(raw.apply(c.get())));
    }

    pub(crate) fn set_altitude(&self, v: AltitudeState) {
        self.altitude.lock(|c| c.set(v));
    }

    pub(crate) fn set_battery(&self, v: BatteryState) {
        self.battery.lock(|c| c.set(v));
    }

    pub(crate) fn set_rc(&self, v: ChannelReadback) {
        self.rc.lock(|c| c.set(v));
    }

    pub(crate) fn set_status(&self, v: StatusState) {
        self.status.lock(|c| c.set(Some(v)));
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

// ── RC channel map ────────────────────────────────────────────────────────────

/// Commanded channel values, channel 1 first.
///
/// Entries are never removed: `len` only grows, and every channel up to it
/// holds either a set value or `NEUTRAL_US`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMap {
    values: [u16; MAX_CHANNELS],
    len: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            values: [NEUTRAL_US; MAX_CHANNELS],
            len: MIN_CHANNELS as u8,
        }
    }
}

impl ChannelMap {
    pub fn check(channel: u8, value: u16) -> Result<(), Error> {
        if channel == 0 || channel as usize > MAX_CHANNELS {
            return Err(Error::InvalidChannel(channel));
        }
        if !(PULSE_MIN_US..=PULSE_MAX_US).contains(&value) {
            return Err(Error::ChannelOutOfRange { channel, value });
        }
        Ok(())
    }

    /// Apply every pair, or none of them if any is invalid.
    pub fn merge(&mut self, overrides: &[(u8, u16)]) -> Result<(), Error> {
        for &(channel, value) in overrides {
            Self::check(channel, value)?;
        }
        for &(channel, value) in overrides {
            self.values[channel as usize - 1] = value;
            self.len = self.len.max(channel);
        }
        Ok(())
    }

    /// 1-indexed channel value.
    pub fn get(&self, channel: u8) -> Option<u16> {
        if channel == 0 || channel > self.len {
            return None;
        }
        Some(self.values[channel as usize - 1])
    }

    /// Channels transmitted: `MIN_CHANNELS` or the highest channel ever set.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn values(&self) -> &[u16] {
        &self.values[..self.len as usize]
    }
}

/// Channel map shared between the caller and the override task.
pub struct SharedChannels {
    map: Mutex<CriticalSectionRawMutex, Cell<ChannelMap>>,
}

impl SharedChannels {
    pub fn new(map: ChannelMap) -> Self {
        Self {
            map: Mutex::new(Cell::new(map)),
        }
    }

    pub fn snapshot(&self) -> ChannelMap {
        self.map.lock(|c| c.get())
    }

    /// Merge under the lock and return the resulting map.
    pub fn merge(&self, overrides: &[(u8, u16)]) -> Result<ChannelMap, Error> {
        self.map.lock(|c| {
            let mut map = c.get();
            map.merge(overrides)?;
            c.set(map);
            Ok(map)
        })
    }
}

// ── Override / arm / mode state ───────────────────────────────────────────────

/// Whether the override task owns channel transmission.
#[derive(Default)]
pub struct OverrideState {
    enabled: AtomicBool,
    frames_sent: AtomicU32,
}

impl OverrideState {
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Channel frames written by the override task.
    pub fn frames_sent(&self) -> u32 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// Arm intent versus what the flight controller last reported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArmState {
    /// Last arm/disarm sent by this client
    pub commanded: bool,
    /// Armed bit of the last status response
    pub reported: Option<bool>,
}

/// Caller-side navigation bookkeeping.
pub struct NavState {
    arm_commanded: AtomicBool,
    mode: Mutex<CriticalSectionRawMutex, Cell<Option<&'static str>>>,
}

impl Default for NavState {
    fn default() -> Self {
        Self {
            arm_commanded: AtomicBool::new(false),
            mode: Mutex::new(Cell::new(None)),
        }
    }
}

impl NavState {
    pub fn arm_commanded(&self) -> bool {
        self.arm_commanded.load(Ordering::Acquire)
    }

    pub(crate) fn set_arm_commanded(&self, armed: bool) {
        self.arm_commanded.store(armed, Ordering::Release);
    }

    pub fn mode(&self) -> Option<&'static str> {
        self.mode.lock(|c| c.get())
    }

    pub(crate) fn set_mode(&self, mode: &'static str) {
        self.mode.lock(|c| c.set(Some(mode)));
    }
}
