mod common;

use core::future::Future;

use common::*;
use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use msp_pilot::config::{AltitudeSource, MODE_NAV_WP, MODE_POSHOLD, MODE_RTH};
use msp_pilot::{Client, ClientConfig, Command, Error};

fn new_client(sim: &SimFc) -> Client<SimFc> {
    Client::new(sim.clone(), ClientConfig::default()).unwrap()
}

/// Drive `f` with both client loops running; the first telemetry cycle has
/// completed by the time `f` starts.
fn with_running<F: Future>(client: &Client<SimFc>, f: impl FnOnce() -> F) -> F::Output {
    let body = async move {
        Timer::after(Duration::from_millis(250)).await;
        f().await
    };
    match block_on(select(client.run(), body)) {
        Either::First(()) => panic!("client loops ended early"),
        Either::Second(out) => out,
    }
}

fn i32_at(p: &[u8], i: usize) -> i32 {
    i32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]])
}

#[test]
fn test_go_to_uploads_waypoint_and_switches_mode() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();
    block_on(nav.go_to(47.397_741_9, 8.545_593_8, 10.0, None)).unwrap();

    let wps = sim.received(Command::SetWp);
    assert_eq!(wps.len(), 1);
    let p = &wps[0].payload;
    assert_eq!(p.len(), 21);
    assert_eq!(p[0], 255);
    assert_eq!(p[1], 1);
    assert_eq!(i32_at(p, 2), 473_977_419);
    assert_eq!(i32_at(p, 6), 85_455_938);
    assert_eq!(i32_at(p, 10), 1000);
    assert!(p[14..].iter().all(|&b| b == 0));

    // Override idle: the mode change goes out right away
    let rc = sim.received(Command::SetRawRc);
    assert_eq!(rc.len(), 1);
    assert_eq!(rc[0].channels()[5], 1800);
    assert_eq!(rc[0].channels()[6], 1000);
    assert!(rc[0].at >= wps[0].at);
    assert_eq!(nav.mode(), Some(MODE_NAV_WP));

    block_on(nav.go_to(47.0, 8.0, 5.0, Some(3))).unwrap();
    assert_eq!(sim.received(Command::SetWp)[1].payload[0], 3);
}

#[test]
fn test_channel_overrides_merge_and_send() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();
    block_on(nav.set_channel_overrides(&[(1, 1100), (12, 1700)])).unwrap();

    let rc = sim.received(Command::SetRawRc);
    assert_eq!(rc.len(), 1);
    let channels = rc[0].channels();
    assert_eq!(channels.len(), 12);
    assert_eq!(channels[0], 1100);
    assert_eq!(channels[2], 1000);
    assert_eq!(channels[4], 1000);
    assert_eq!(channels[8], 1500);
    assert_eq!(channels[11], 1700);

    // A later write keeps everything else
    block_on(nav.set_channel_overrides(&[(2, 1400)])).unwrap();
    let channels = sim.received(Command::SetRawRc)[1].channels();
    assert_eq!(channels.len(), 12);
    assert_eq!(channels[0], 1100);
    assert_eq!(channels[1], 1400);
    assert_eq!(channels[11], 1700);

    // With the override task in charge nothing is sent synchronously
    nav.enable_override();
    block_on(nav.set_channel_overrides(&[(4, 1600)])).unwrap();
    assert_eq!(sim.received(Command::SetRawRc).len(), 2);
    assert_eq!(nav.channel(4), Some(1600));
}

#[test]
fn test_invalid_overrides_not_applied() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();

    assert_eq!(
        block_on(nav.set_channel_overrides(&[(2, 1600), (19, 1500)])),
        Err(Error::InvalidChannel(19))
    );
    assert_eq!(
        block_on(nav.set_channel_overrides(&[(2, 1600), (3, 2500)])),
        Err(Error::ChannelOutOfRange {
            channel: 3,
            value: 2500
        })
    );
    assert_eq!(nav.channel(2), Some(1500));
    assert_eq!(nav.channel(3), Some(1000));
    assert!(sim.received(Command::SetRawRc).is_empty());
}

#[test]
fn test_unknown_mode_leaves_map_untouched() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();
    block_on(nav.hold_here()).unwrap();
    sim.clear_received();

    assert_eq!(block_on(nav.set_mode("ACRO")), Err(Error::UnknownMode));
    assert_eq!(nav.channel(6), Some(1500));
    assert_eq!(nav.mode(), Some(MODE_POSHOLD));
    assert!(sim.with(|s| s.received.is_empty()));
}

#[test]
fn test_mode_switches() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();

    block_on(nav.return_to_home()).unwrap();
    assert_eq!(nav.channel(7), Some(1800));
    assert_eq!(nav.mode(), Some(MODE_RTH));

    // Leaving RTH drops its switch again
    block_on(nav.hold_here()).unwrap();
    assert_eq!(nav.channel(6), Some(1500));
    assert_eq!(nav.channel(7), Some(1000));
    assert_eq!(nav.mode(), Some(MODE_POSHOLD));
}

#[test]
fn test_arm_disarm() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();

    block_on(nav.arm()).unwrap();
    assert_eq!(nav.channel(5), Some(2000));
    let state = nav.arm_state();
    assert!(state.commanded);
    assert_eq!(state.reported, None);

    block_on(nav.emergency_stop()).unwrap();
    assert_eq!(nav.channel(5), Some(1000));
    assert!(!nav.arm_state().commanded);
    let rc = sim.received(Command::SetRawRc);
    assert_eq!(rc.len(), 2);
    assert_eq!(rc[0].channels()[4], 2000);
    assert_eq!(rc[1].channels()[4], 1000);
}

#[test]
fn test_armed_bit_reported_by_poll() {
    let sim = SimFc::healthy();
    sim.respond(Command::Status, status_payload(0x23, 0x1));
    let config = ClientConfig {
        poll_status: true,
        ..ClientConfig::default()
    };
    let client = Client::new(sim.clone(), config).unwrap();

    let state = with_running(&client, || async { client.nav().arm_state() });
    assert!(!state.commanded);
    assert_eq!(state.reported, Some(true));
}

#[test]
fn test_ready_to_arm_follows_battery() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    assert!(!client.nav().is_ready_to_arm());
    assert!(with_running(&client, || async { client.nav().is_ready_to_arm() }));

    let sim = SimFc::healthy();
    sim.respond(Command::Analog, analog_payload(95, 1200));
    let client = new_client(&sim);
    assert!(!with_running(&client, || async { client.nav().is_ready_to_arm() }));
}

#[test]
fn test_climb_to_converges() {
    let sim = SimFc::healthy();
    // 1 m/s climb from the ground
    sim.with(|s| s.altitude = Some(Box::new(|t: Duration| t.as_millis() as i32 / 10)));
    let client = new_client(&sim);

    let result = with_running(&client, || async {
        client
            .nav()
            .climb_to(2.0, 0.3, Duration::from_secs(5))
            .await
    });
    assert_eq!(result, Ok(()));
    let alt = client.telemetry().altitude().estimated_alt;
    assert!((alt - 2.0).abs() <= 0.3, "stopped at {} m", alt);

    let wps = sim.received(Command::SetWp);
    assert_eq!(wps.len(), 1);
    assert_eq!(i32_at(&wps[0].payload, 2), 473_977_419);
    assert_eq!(i32_at(&wps[0].payload, 10), 200);
    assert_eq!(client.nav().mode(), Some(MODE_NAV_WP));
}

#[test]
fn test_climb_to_times_out() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);

    let (result, elapsed) = with_running(&client, || async {
        let started = Instant::now();
        let result = client
            .nav()
            .climb_to(10.0, 0.5, Duration::from_millis(600))
            .await;
        (result, started.elapsed())
    });
    assert_eq!(result, Err(Error::Timeout));
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_millis(900));
}

#[test]
fn test_climb_to_ends_when_client_stops() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let nav = client.nav();

    let ((), (result, elapsed)) = block_on(join(client.run(), async {
        Timer::after(Duration::from_millis(250)).await;
        let started = Instant::now();
        let (result, ()) = join(nav.climb_to(10.0, 0.5, Duration::from_secs(5)), async {
            Timer::after(Duration::from_millis(300)).await;
            client.stop();
        })
        .await;
        (result, started.elapsed())
    }));
    assert_eq!(result, Err(Error::Stopped));
    assert!(elapsed < Duration::from_secs(1), "gave up after {} ms", elapsed.as_millis());
    assert!(client.telemetry().is_stopped());

    // Frozen telemetry after close is no reason to wait either
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    with_running(&client, || async {});
    assert!(!client.telemetry().is_stopped());
    assert!(block_on(client.close()).is_some());
    assert!(client.telemetry().is_stopped());
}

#[test]
fn test_climb_to_gps_altitude() {
    // Barometer reads 0 m, GPS 48.8 m above sea level
    let sim = SimFc::healthy();
    let client = Client::new(
        sim.clone(),
        ClientConfig {
            climb_altitude_source: AltitudeSource::Gps,
            ..ClientConfig::default()
        },
    )
    .unwrap();
    let result = with_running(&client, || async {
        client
            .nav()
            .climb_to(48.0, 1.0, Duration::from_secs(2))
            .await
    });
    assert_eq!(result, Ok(()));

    let client = new_client(&sim);
    let result = with_running(&client, || async {
        client
            .nav()
            .climb_to(48.0, 1.0, Duration::from_millis(400))
            .await
    });
    assert_eq!(result, Err(Error::Timeout));
}

#[test]
fn test_climb_to_needs_position() {
    let sim = SimFc::healthy();
    sim.respond(Command::RawGps, gps_payload(0, 0, 0, 0, 0));
    let client = new_client(&sim);

    let result = with_running(&client, || async {
        client
            .nav()
            .climb_to(5.0, 0.5, Duration::from_secs(1))
            .await
    });
    assert_eq!(result, Err(Error::NoPositionFix));
    assert!(sim.received(Command::SetWp).is_empty());
}

#[test]
fn test_takeoff_and_land() {
    let sim = SimFc::healthy();
    sim.respond(Command::Altitude, altitude_payload(1_020, 0));
    let client = new_client(&sim);

    let result = with_running(&client, || async {
        client.nav().takeoff(10.0, Duration::from_secs(2)).await
    });
    assert_eq!(result, Ok(()));
    let nav = client.nav();
    assert_eq!(nav.channel(5), Some(2000));
    assert!(nav.arm_state().commanded);
    assert_eq!(nav.mode(), Some(MODE_NAV_WP));
    // POSHOLD went out before the waypoint mode
    let six: Vec<u16> = sim
        .received(Command::SetRawRc)
        .iter()
        .map(|r| r.channels()[5])
        .collect();
    assert_eq!(six, vec![1500, 1500, 1800]);

    sim.respond(Command::Altitude, altitude_payload(30, -20));
    sim.clear_received();
    let result = with_running(&client, || async {
        client.nav().land(Duration::from_secs(2)).await
    });
    assert_eq!(result, Ok(()));
    assert_eq!(nav.channel(5), Some(1000));
    assert!(!nav.arm_state().commanded);
    let wps = sim.received(Command::SetWp);
    assert_eq!(i32_at(&wps[0].payload, 10), 50);
}

#[test]
fn test_follow_path_in_order() {
    let sim = SimFc::healthy();
    let client = new_client(&sim);
    let path = [(47.0, 8.0, 20.0), (47.001, 8.001, 30.0)];
    block_on(client.nav().follow_path(&path, Duration::from_millis(100))).unwrap();

    let wps = sim.received(Command::SetWp);
    assert_eq!(wps.len(), 2);
    assert_eq!(i32_at(&wps[0].payload, 10), 2000);
    assert_eq!(i32_at(&wps[1].payload, 10), 3000);
    assert_eq!(i32_at(&wps[1].payload, 2), 470_010_000);
    assert!(wps[1].at - wps[0].at >= Duration::from_millis(100));
}
