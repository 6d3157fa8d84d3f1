use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};
use embedded_io_async::{Read, Write};

use crate::config::ClientConfig;
use crate::drivers::link::Link;
use crate::drivers::msp_defines::{self as defines, Command};
use crate::error::Error;
use crate::state::TelemetryStore;
use crate::tasks::StopSignal;

/// Requested every cycle, in this order.
const POLLED: [Command; 5] = [
    Command::Attitude,
    Command::RawGps,
    Command::Altitude,
    Command::Analog,
    Command::Rc,
];

/// Telemetry poll loop, one cycle per `config.poll_period`.
///
/// Ends when `stop` is raised or the transport has been taken out of the link.
pub async fn poll_task<T: Read + Write>(
    link: &Link<T>,
    store: &TelemetryStore,
    config: &ClientConfig,
    stop: &StopSignal,
) {
    info!("poll: every {} ms", config.poll_period.as_millis());
    store.set_stopped(false);
    let mut ticker = Ticker::every(config.poll_period);

    loop {
        if let Either::First(()) = select(stop.wait(), ticker.next()).await {
            break;
        }
        if let Err(e) = poll_cycle(link, store, config, stop).await {
            warn!("poll: {:?}, stopping", e);
            break;
        }
    }
    store.set_stopped(true);
    info!("poll: stopped after {} cycles", store.cycles());
}

/// One pass over every polled field.
///
/// A failed exchange is logged and counted and leaves its field untouched;
/// the remaining fields are still requested. Only a closed transport is
/// returned as an error. Returns early, without counting the cycle, once
/// `stop` is raised.
pub async fn poll_cycle<T: Read + Write>(
    link: &Link<T>,
    store: &TelemetryStore,
    config: &ClientConfig,
    stop: &StopSignal,
) -> Result<(), Error> {
    let status = config.poll_status.then_some(Command::Status);
    for command in POLLED.into_iter().chain(status) {
        if stop.signaled() {
            return Ok(());
        }
        match poll_field(link, store, command, config.request_timeout).await {
            Ok(()) => {}
            Err(Error::TransportClosed) => return Err(Error::TransportClosed),
            Err(e) => {
                store.record_failure();
                warn!("poll: cmd {} failed: {:?}", command.id(), e);
            }
        }
    }
    store.record_cycle();
    Ok(())
}

async fn poll_field<T: Read + Write>(
    link: &Link<T>,
    store: &TelemetryStore,
    command: Command,
    timeout: Duration,
) -> Result<(), Error> {
    let payload = link.request(command, timeout).await?;
    match command {
        Command::Attitude => store.set_attitude(defines::parse_attitude(&payload)?),
        Command::RawGps => store.update_gps(defines::parse_raw_gps(&payload)?),
        Command::Altitude => store.set_altitude(defines::parse_altitude(&payload)?),
        Command::Analog => store.set_battery(defines::parse_analog(&payload)?),
        Command::Rc => store.set_rc(defines::parse_rc(&payload)?),
        Command::Status => store.set_status(defines::parse_status(&payload)?),
        Command::SetRawRc | Command::SetWp => {}
    }
    Ok(())
}
