// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use belt_monitor::modbus::register_map::{register_name, DISPLAY_BASE};
use belt_monitor::modbus::{start_plc_simulator, RegisterBank};
use clap::Parser;
use log::info;

/// Simulated belt PLC serving the alarm and enable registers over Modbus TCP
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Listen address
    #[clap(long, default_value = "127.0.0.1:5020")]
    listen: SocketAddr,

    /// Initial detection enable mask
    #[clap(long)]
    enable_mask: Option<u16>,

    /// Log register writes every N seconds (0 disables)
    #[clap(long, default_value = "5")]
    report_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let bank = RegisterBank::new();
    if let Some(mask) = args.enable_mask {
        bank.set(belt_monitor::modbus::register_map::ENABLE_REGISTER, mask);
    }

    let (local_addr, _server) = start_plc_simulator(args.listen, bank.clone())
        .await
        .with_context(|| format!("Cannot bind PLC simulator on {}", args.listen))?;
    println!("PLC simulator listening on {local_addr}, press Ctrl+C to stop");

    if args.report_interval > 0 {
        let bank = bank.clone();
        let interval = Duration::from_secs(args.report_interval);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                for (address, value) in bank.write_history() {
                    info!(
                        "{} {} <- {}",
                        DISPLAY_BASE + address as u32,
                        register_name(address).unwrap_or("unused"),
                        value
                    );
                }
                bank.clear_history();
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("PLC simulator stopped");
    Ok(())
}
