// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{Context, Result};
use belt_monitor::config::ModbusConfig;
use belt_monitor::modbus::register_map::{
    register_name, COAL_FILL_REGISTER, DISPLAY_BASE, ENABLE_REGISTER, LAST_REGISTER,
};
use belt_monitor::modbus::{EnableBit, FeatureToggles, PlcClient, WriteCheck};
use clap::Parser;

/// Diagnostic client dumping the alarm and enable registers of the belt PLC
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// PLC address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// PLC Modbus TCP port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[clap(long, default_value = "1")]
    unit_id: u8,

    /// First holding register to read
    #[clap(long, default_value = "0")]
    start: u16,

    /// Number of registers to read
    #[clap(long, default_value_t = LAST_REGISTER + 1)]
    quantity: u16,

    /// Write this detection enable mask (decimal or 0x hex) before dumping
    #[clap(long, value_parser = parse_mask)]
    set_enable: Option<u16>,
}

fn parse_mask(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid mask '{value}': {e}"))
}

fn describe_value(address: u16, value: u16) -> String {
    match address {
        COAL_FILL_REGISTER => format!("{:.1}% full", value as f64 / 10.0),
        ENABLE_REGISTER => {
            let toggles = FeatureToggles::from_raw(value);
            let enabled: Vec<&str> = EnableBit::ALL
                .iter()
                .filter(|bit| toggles.is_enabled(**bit))
                .map(|bit| bit.label())
                .collect();
            if enabled.is_empty() {
                "all detections disabled".to_string()
            } else {
                format!("enabled: {}", enabled.join(", "))
            }
        }
        _ if register_name(address).is_none() => String::new(),
        _ if value == 0 => "clear".to_string(),
        _ => "ACTIVE".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let config = ModbusConfig {
        address: args.address.clone(),
        port: args.port,
        unit_id: args.unit_id,
        enable_value_on_connect: None,
        ..Default::default()
    };
    let client = PlcClient::from_config(&config);

    println!("Connecting to PLC at {}:{}", args.address, args.port);
    client.connect().await.context("PLC connection failed")?;

    if let Some(mask) = args.set_enable {
        match client.write_register(ENABLE_REGISTER, mask as i64).await? {
            WriteCheck::Verified => println!("Enable mask set to {mask:#06x}"),
            WriteCheck::Mismatch { expected, actual } => println!(
                "Enable mask write not applied: wrote {expected:#06x}, PLC holds {actual:#06x}"
            ),
            WriteCheck::Unverified => println!("Enable mask written, read-back failed"),
        }
    }

    let values = client
        .dump_registers(args.start, args.quantity)
        .await
        .context("Register dump failed")?;

    println!("Raw register values: {:?}", values);
    for (offset, value) in values.iter().enumerate() {
        let address = args.start + offset as u16;
        let display = DISPLAY_BASE + address as u32;
        let name = register_name(address).unwrap_or("unused");
        println!(
            "{} (register {:>2}) {:<26} = {:>5}  {}",
            display,
            address,
            name,
            value,
            describe_value(address, *value)
        );
    }

    client.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mask() {
        assert_eq!(parse_mask("15"), Ok(15));
        assert_eq!(parse_mask("0x0F"), Ok(15));
        assert!(parse_mask("0xZZ").is_err());
    }

    #[test]
    fn test_describe_value() {
        assert_eq!(describe_value(COAL_FILL_REGISTER, 250), "25.0% full");
        assert_eq!(describe_value(3, 1), "ACTIVE");
        assert_eq!(describe_value(3, 0), "clear");
        assert_eq!(describe_value(ENABLE_REGISTER, 0), "all detections disabled");
        assert_eq!(describe_value(5, 9), "");
    }
}
