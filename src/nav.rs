//! Navigation and control on top of the channel map and the telemetry store.
//!
//! Mode changes and arming are channel writes; the flight controller decides
//! whether to follow them. Convergence is judged from polled telemetry only,
//! so the poll task must be running for `climb_to` and friends to finish.

use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
#[allow(unused_imports)]
use micromath::F32Ext;

use crate::config::{AltitudeSource, ClientConfig, ARM_OFF_US, ARM_ON_US, MODE_NAV_WP, MODE_POSHOLD, MODE_RTH};
use crate::drivers::link::Link;
use crate::drivers::msp_defines::{self as defines, payload_set_raw_rc, Command, Waypoint};
use crate::error::Error;
use crate::state::{ArmState, NavState, OverrideState, SharedChannels, StatusState, TelemetryStore};

pub struct NavigationController<'a, T> {
    link: &'a Link<T>,
    channels: &'a SharedChannels,
    overrides: &'a OverrideState,
    nav: &'a NavState,
    telemetry: &'a TelemetryStore,
    config: &'a ClientConfig,
}

impl<'a, T: Read + Write> NavigationController<'a, T> {
    pub fn new(
        link: &'a Link<T>,
        channels: &'a SharedChannels,
        overrides: &'a OverrideState,
        nav: &'a NavState,
        telemetry: &'a TelemetryStore,
        config: &'a ClientConfig,
    ) -> Self {
        Self {
            link,
            channels,
            overrides,
            nav,
            telemetry,
            config,
        }
    }

    // ── Channels ──────────────────────────────────────────────────────────────

    /// Hand channel transmission to the override task.
    pub fn enable_override(&self) {
        self.overrides.set_enabled(true);
        info!("nav: channel override enabled");
    }

    pub fn disable_override(&self) {
        self.overrides.set_enabled(false);
        info!("nav: channel override disabled");
    }

    /// Merge `(channel, µs)` pairs into the channel map.
    ///
    /// With the override task idle the resulting map is sent once, right away.
    /// Nothing is applied if any pair is invalid.
    pub async fn set_channel_overrides(&self, overrides: &[(u8, u16)]) -> Result<(), Error> {
        let map = self.channels.merge(overrides)?;
        if !self.overrides.is_enabled() {
            self.link
                .send(Command::SetRawRc, &payload_set_raw_rc(&map))
                .await?;
        }
        Ok(())
    }

    /// Commanded value of a 1-indexed channel.
    pub fn channel(&self, channel: u8) -> Option<u16> {
        self.channels.snapshot().get(channel)
    }

    // ── Arming ────────────────────────────────────────────────────────────────

    /// Raise the arm switch. Whether the flight controller arms shows up in
    /// `arm_state().reported` once status is polled or fetched.
    pub async fn arm(&self) -> Result<(), Error> {
        self.nav.set_arm_commanded(true);
        info!("nav: arm");
        self.set_channel_overrides(&[(self.config.arm_channel, ARM_ON_US)])
            .await
    }

    pub async fn disarm(&self) -> Result<(), Error> {
        self.nav.set_arm_commanded(false);
        info!("nav: disarm");
        self.set_channel_overrides(&[(self.config.arm_channel, ARM_OFF_US)])
            .await
    }

    pub async fn emergency_stop(&self) -> Result<(), Error> {
        warn!("nav: emergency stop");
        self.disarm().await
    }

    pub fn arm_state(&self) -> ArmState {
        ArmState {
            commanded: self.nav.arm_commanded(),
            reported: self.telemetry.status().map(|s| s.armed()),
        }
    }

    /// Enough battery to arm. False until a battery reading has been polled.
    pub fn is_ready_to_arm(&self) -> bool {
        self.telemetry.battery().voltage >= self.config.min_arm_voltage
    }

    /// Request `MSP_STATUS` once and store it.
    pub async fn fetch_status(&self) -> Result<StatusState, Error> {
        let payload = self
            .link
            .request(Command::Status, self.config.request_timeout)
            .await?;
        let status = defines::parse_status(&payload)?;
        self.telemetry.set_status(status);
        Ok(status)
    }

    // ── Modes ─────────────────────────────────────────────────────────────────

    /// Apply the channel values configured for `name`.
    pub async fn set_mode(&self, name: &str) -> Result<(), Error> {
        let entry = self.config.modes.get(name).ok_or(Error::UnknownMode)?;
        self.set_channel_overrides(&entry.channels).await?;
        self.nav.set_mode(entry.name);
        info!("nav: mode {}", entry.name);
        Ok(())
    }

    /// Last mode successfully commanded.
    pub fn mode(&self) -> Option<&'static str> {
        self.nav.mode()
    }

    pub async fn return_to_home(&self) -> Result<(), Error> {
        self.set_mode(MODE_RTH).await
    }

    pub async fn hold_here(&self) -> Result<(), Error> {
        self.set_mode(MODE_POSHOLD).await
    }

    // ── Waypoints ─────────────────────────────────────────────────────────────

    /// Upload a waypoint (`slot` defaults to the configured one) and switch
    /// to waypoint navigation.
    pub async fn go_to(&self, lat: f64, lon: f64, alt: f32, slot: Option<u8>) -> Result<(), Error> {
        let wp = Waypoint::new(slot.unwrap_or(self.config.waypoint_slot), lat, lon, alt);
        self.send_waypoint(&wp).await?;
        self.set_mode(MODE_NAV_WP).await
    }

    /// Upload `wp` as is, without touching the mode.
    pub async fn send_waypoint(&self, wp: &Waypoint) -> Result<(), Error> {
        debug!("nav: waypoint slot {} alt {} m", wp.slot, wp.alt);
        self.link
            .send(Command::SetWp, &defines::payload_set_wp(wp))
            .await
    }

    /// `go_to` each `(lat, lon, alt)` in order, waiting `dwell` between them.
    pub async fn follow_path(&self, path: &[(f64, f64, f32)], dwell: Duration) -> Result<(), Error> {
        for (i, &(lat, lon, alt)) in path.iter().enumerate() {
            if i > 0 {
                Timer::after(dwell).await;
            }
            debug!("nav: path point {}/{}", i + 1, path.len());
            self.go_to(lat, lon, alt, None).await?;
        }
        Ok(())
    }

    // ── Altitude ──────────────────────────────────────────────────────────────

    /// Altitude reading selected by `config.climb_altitude_source`.
    fn current_altitude(&self) -> Option<f32> {
        match self.config.climb_altitude_source {
            AltitudeSource::Estimated => Some(self.telemetry.altitude().estimated_alt),
            AltitudeSource::Gps => self.telemetry.gps().alt,
        }
    }

    /// Target `target` metres over the current position and wait until the
    /// configured altitude reading is within `tolerance`.
    ///
    /// Gives up with [`Error::Stopped`] once telemetry polling has ended.
    pub async fn climb_to(&self, target: f32, tolerance: f32, timeout: Duration) -> Result<(), Error> {
        let (lat, lon) = self.telemetry.gps().position().ok_or(Error::NoPositionFix)?;
        self.go_to(lat, lon, target, None).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let current = self.current_altitude();
            if let Some(alt) = current.filter(|alt| (alt - target).abs() <= tolerance) {
                info!("nav: reached {} m", alt);
                return Ok(());
            }
            if self.telemetry.is_stopped() {
                warn!("nav: polling stopped before {} m was reached", target);
                return Err(Error::Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("nav: altitude {:?} m, target {} m not reached", current, target);
                return Err(Error::Timeout);
            }
            Timer::at(deadline.min(now + self.config.convergence_interval)).await;
        }
    }

    /// Arm, hold position, then climb.
    pub async fn takeoff(&self, target: f32, timeout: Duration) -> Result<(), Error> {
        self.arm().await?;
        self.set_mode(MODE_POSHOLD).await?;
        self.climb_to(target, self.config.takeoff_tolerance, timeout)
            .await
    }

    /// Descend to the configured landing altitude, then disarm.
    pub async fn land(&self, timeout: Duration) -> Result<(), Error> {
        self.climb_to(self.config.land_altitude, self.config.land_tolerance, timeout)
            .await?;
        self.disarm().await
    }
}
