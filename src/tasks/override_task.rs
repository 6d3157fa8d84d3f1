use embassy_futures::select::{select, Either};
use embassy_time::Ticker;
use embedded_io_async::{Read, Write};

use crate::config::ClientConfig;
use crate::drivers::link::Link;
use crate::drivers::msp_defines::{payload_set_raw_rc, Command};
use crate::error::Error;
use crate::state::{OverrideState, SharedChannels};
use crate::tasks::StopSignal;

/// Channel override loop: while enabled, the current channel map goes out as
/// `MSP_SET_RAW_RC` every `config.override_period`. No response is read.
///
/// A failed send is logged and retried on the next tick.
pub async fn override_task<T: Read + Write>(
    link: &Link<T>,
    channels: &SharedChannels,
    overrides: &OverrideState,
    config: &ClientConfig,
    stop: &StopSignal,
) {
    info!("override: every {} ms", config.override_period.as_millis());
    let mut ticker = Ticker::every(config.override_period);

    loop {
        if let Either::First(()) = select(stop.wait(), ticker.next()).await {
            break;
        }
        if !overrides.is_enabled() {
            continue;
        }

        let payload = payload_set_raw_rc(&channels.snapshot());
        match link.send(Command::SetRawRc, &payload).await {
            Ok(()) => overrides.record_sent(),
            Err(Error::TransportClosed) => {
                warn!("override: transport closed, stopping");
                break;
            }
            Err(e) => warn!("override: send failed: {:?}", e),
        }
    }
    info!("override: stopped after {} frames", overrides.frames_sent());
}
