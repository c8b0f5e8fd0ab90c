// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end run of the daemon against the simulated PLC

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use belt_monitor::config::Config;
use belt_monitor::daemon::Daemon;
use belt_monitor::detection::{BoundingBox, Detection, DetectionClass, DetectionFrame};
use belt_monitor::modbus::register_map::{
    COAL_FILL_REGISTER, DEVIATION_REGISTER, ENABLE_REGISTER, SMOKE_REGISTER,
};
use belt_monitor::modbus::{start_plc_simulator, FeatureToggles, RegisterBank};
use belt_monitor::source::MemorySource;
use tokio::time;

fn frames() -> Vec<DetectionFrame> {
    let belt = Detection::new(
        DetectionClass::Belt,
        0.95,
        BoundingBox::new(0.0, 0.0, 100.0, 10.0),
    );
    let coal = Detection::new(
        DetectionClass::CoalFill,
        0.9,
        BoundingBox::new(0.0, 0.0, 50.0, 5.0),
    );
    let smoke = Detection::new(
        DetectionClass::Smoke,
        0.85,
        BoundingBox::new(200.0, 20.0, 260.0, 80.0),
    );
    let left_shaft = Detection::new(
        DetectionClass::LeftShaft,
        0.9,
        BoundingBox::new(10.0, 100.0, 40.0, 200.0),
    );

    vec![
        DetectionFrame::new(1, 1, 800, 450).with_detections(vec![belt.clone(), coal.clone()]),
        DetectionFrame::new(1, 2, 800, 450).with_detections(vec![
            belt.clone(),
            coal.clone(),
            smoke.clone(),
        ]),
        DetectionFrame::new(1, 3, 800, 450).with_detections(vec![belt, coal, smoke, left_shaft]),
    ]
}

async fn wait_until_stopped(daemon: &Daemon) {
    for _ in 0..100 {
        if !daemon.is_running() {
            return;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
    panic!("daemon did not stop after the source ended");
}

#[tokio::test]
async fn test_replay_raises_and_clears_alarms() {
    let bank = RegisterBank::new();
    let (socket_addr, _server) =
        start_plc_simulator(SocketAddr::from_str("127.0.0.1:0").unwrap(), bank.clone())
            .await
            .unwrap();

    let telemetry_dir = tempfile::tempdir().unwrap();
    let telemetry_path = telemetry_dir.path().join("telemetry.jsonl");

    let mut config = Config::default();
    config.modbus.address = socket_addr.ip().to_string();
    config.modbus.port = socket_addr.port();
    config.modbus.enable_value_on_connect = None;
    config.daemon.poll_interval_ms = 20;
    config.telemetry.output_file = Some(telemetry_path.to_string_lossy().into_owned());

    let mut daemon = Daemon::new();
    daemon
        .launch(&config, Box::new(MemorySource::new(frames())), None)
        .await
        .unwrap();

    wait_until_stopped(&daemon).await;
    let toggles = *daemon.toggles().read().await;
    daemon.join().await.unwrap();

    assert_eq!(toggles, FeatureToggles::all_enabled());
    assert_eq!(bank.get(ENABLE_REGISTER), Some(0x0F));

    // Raised while running, cleared on exit
    let history = bank.write_history();
    assert!(history.contains(&(SMOKE_REGISTER, 1)));
    assert!(history.contains(&(DEVIATION_REGISTER, 1)));
    assert!(history.contains(&(COAL_FILL_REGISTER, 250)));
    assert_eq!(bank.get(SMOKE_REGISTER), Some(0));
    assert_eq!(bank.get(DEVIATION_REGISTER), Some(0));
    assert_eq!(bank.get(COAL_FILL_REGISTER), Some(0));

    let telemetry = std::fs::read_to_string(&telemetry_path).unwrap();
    let lines: Vec<serde_json::Value> = telemetry
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["alarms"], serde_json::json!(["smoke"]));
    // Smoke is in cooldown on the third frame, deviation is new
    assert_eq!(lines[2]["alarms"], serde_json::json!(["deviation"]));
    let fill_ratio = lines[2]["fill_ratio"].as_f64().unwrap();
    assert!((fill_ratio - 25.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_daemon_runs_without_plc() {
    // Port with no listener
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let socket_addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = Config::default();
    config.modbus.address = socket_addr.ip().to_string();
    config.modbus.port = socket_addr.port();
    config.modbus.timeout_ms = 200;
    config.telemetry.enabled = false;

    let mut daemon = Daemon::new();
    daemon
        .launch(&config, Box::new(MemorySource::new(frames())), None)
        .await
        .unwrap();

    wait_until_stopped(&daemon).await;
    // Unreadable enable register leaves every detection enabled
    assert_eq!(*daemon.toggles().read().await, FeatureToggles::all_enabled());
    assert!(daemon.telemetry().is_none());
    daemon.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_a_long_source() {
    let bank = RegisterBank::new();
    let (socket_addr, _server) =
        start_plc_simulator(SocketAddr::from_str("127.0.0.1:0").unwrap(), bank.clone())
            .await
            .unwrap();

    let mut config = Config::default();
    config.modbus.address = socket_addr.ip().to_string();
    config.modbus.port = socket_addr.port();

    // Enough frames to outlive the shutdown request
    let long_run = (0..100_000u64).map(|i| DetectionFrame::new(1, i + 1, 800, 450));
    let mut daemon = Daemon::new();
    daemon
        .launch(&config, Box::new(MemorySource::new(long_run)), None)
        .await
        .unwrap();

    time::sleep(Duration::from_millis(50)).await;
    daemon.shutdown();
    assert!(!daemon.is_running());
    daemon.join().await.unwrap();
}
