// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the conveyor belt monitor
use anyhow::{Context, Result};
use belt_monitor::config::{self, Config};
use belt_monitor::daemon::Daemon;
use belt_monitor::source::{FrameSink, JsonLinesSource, WriterFrameSink};
use clap::Parser;
use log::{error, info};

use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

/// Conveyor belt monitor raising PLC alarms from camera detections
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (created with defaults when missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate a configuration file and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Replay recorded detection frames (one JSON frame per line)
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Write the encoded image of every processed frame to this file or pipe
    #[arg(long, value_name = "FILE")]
    stream_out: Option<PathBuf>,

    /// PLC address
    #[arg(long)]
    modbus_address: Option<String>,

    /// PLC Modbus TCP port
    #[arg(long)]
    modbus_port: Option<u16>,

    /// Camera identifier reported with alarm events
    #[arg(long)]
    camera_id: Option<u32>,

    /// Minimum minutes between two reports of the same alarm
    #[arg(long)]
    cooldown_minutes: Option<u64>,

    /// Base URL of the alarm event backend
    #[arg(long, value_name = "URL")]
    event_base_url: Option<String>,

    /// Report alarm events to the HTTP backend
    #[arg(long)]
    report_events: Option<bool>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable logging
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {:#}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    config.apply_args(
        args.modbus_address.clone(),
        args.modbus_port,
        args.camera_id,
        args.cooldown_minutes,
        args.event_base_url.clone(),
        args.report_events,
    );

    let replay = args
        .replay
        .clone()
        .context("No detection source: pass --replay <FILE>")?;
    let source = JsonLinesSource::open(&replay).await?;

    let frame_sink: Option<Box<dyn FrameSink>> = match &args.stream_out {
        Some(path) => Some(Box::new(WriterFrameSink::create(path).await?)),
        None => None,
    };

    info!(
        "Starting belt monitor for camera {} (PLC {}:{})",
        config.detection.camera_id, config.modbus.address, config.modbus.port
    );
    let mut daemon = Daemon::new();
    daemon.launch(&config, Box::new(source), frame_sink).await?;

    // Wait for a termination signal or the end of the detection source
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("Received shutdown signal, terminating daemon"),
                    Err(err) => error!("Error waiting for shutdown signal: {}", err),
                }
                daemon.shutdown();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if !daemon.is_running() {
                    info!("Detection stopped, terminating daemon");
                    break;
                }
            }
        }
    }

    daemon.join().await
}
