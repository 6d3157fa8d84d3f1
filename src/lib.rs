//! MSP v1 client for iNav-style flight controllers.
//!
//! [`Client`] owns the serial transport and runs two loops over it: telemetry
//! polling into a [`TelemetryStore`] and periodic RC channel override. The
//! [`NavigationController`] it hands out arms, switches modes, uploads
//! waypoints and waits for altitude convergence.
//!
//! ```ignore
//! let client = Client::new(uart, ClientConfig::default())?;
//! join(client.run(), async {
//!     let nav = client.nav();
//!     nav.enable_override();
//!     nav.takeoff(10.0, Duration::from_secs(30)).await?;
//!     nav.land(Duration::from_secs(60)).await?;
//!     client.stop();
//! })
//! .await;
//! ```

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod config;
pub mod drivers;
pub mod error;
pub mod nav;
pub mod state;
pub mod tasks;

use embassy_futures::join::join;
use embedded_io_async::{Read, Write};

pub use config::ClientConfig;
pub use drivers::msp_defines::{Command, Waypoint};
pub use error::Error;
pub use nav::NavigationController;
pub use state::TelemetryStore;

use drivers::link::Link;
use state::{NavState, OverrideState, SharedChannels};
use tasks::override_task::override_task;
use tasks::poll_task::poll_task;
use tasks::StopSignal;

pub struct Client<T> {
    link: Link<T>,
    telemetry: TelemetryStore,
    channels: SharedChannels,
    overrides: OverrideState,
    nav: NavState,
    config: ClientConfig,
    stop_poll: StopSignal,
    stop_override: StopSignal,
}

impl<T: Read + Write> Client<T> {
    /// Validate `config` and seed the channel map with its initial values.
    /// Nothing is sent until [`Client::run`] or a navigation call.
    pub fn new(transport: T, config: ClientConfig) -> Result<Self, Error> {
        config.validate()?;
        let channels = SharedChannels::new(config.initial_map()?);
        Ok(Self {
            link: Link::new(transport),
            telemetry: TelemetryStore::new(),
            channels,
            overrides: OverrideState::default(),
            nav: NavState::default(),
            config,
            stop_poll: StopSignal::new(),
            stop_override: StopSignal::new(),
        })
    }

    /// Run the poll and override loops until [`Client::stop`] or
    /// [`Client::close`] is called.
    pub async fn run(&self) {
        info!("client: started");
        join(
            poll_task(&self.link, &self.telemetry, &self.config, &self.stop_poll),
            override_task(
                &self.link,
                &self.channels,
                &self.overrides,
                &self.config,
                &self.stop_override,
            ),
        )
        .await;
        info!("client: stopped");
    }

    /// Ask both loops to end. An exchange in flight completes or times out
    /// first, so `run` returns within one request timeout. Altitude waits in
    /// progress give up with [`Error::Stopped`] at their next check.
    pub fn stop(&self) {
        self.telemetry.set_stopped(true);
        self.stop_poll.signal(());
        self.stop_override.signal(());
    }

    pub fn nav(&self) -> NavigationController<'_, T> {
        NavigationController::new(
            &self.link,
            &self.channels,
            &self.overrides,
            &self.nav,
            &self.telemetry,
            &self.config,
        )
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.telemetry
    }

    pub fn override_state(&self) -> &OverrideState {
        &self.overrides
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop both loops and take the transport out of the link. Later
    /// operations fail with [`Error::TransportClosed`].
    pub async fn close(&self) -> Option<T> {
        self.stop();
        let transport = self.link.close().await;
        info!("client: transport closed");
        transport
    }

    /// Give the transport back. `None` if [`Client::close`] already took it.
    pub fn into_transport(self) -> Option<T> {
        self.link.into_inner()
    }
}
