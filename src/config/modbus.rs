// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC connection configuration
//!
//! This module defines how the alarm bridge reaches the belt PLC over Modbus TCP.

use serde::{Deserialize, Serialize};

use crate::modbus::register_map::ENABLE_REGISTER;

/// Configuration of the Modbus TCP link to the belt PLC.
///
/// # Fields
///
/// * `address` - Host name or IP address of the PLC (default: 127.0.0.1)
/// * `port` - Modbus TCP port of the PLC (default: 502)
/// * `unit_id` - Modbus unit identifier (default: 1)
/// * `timeout_ms` - Per-request timeout in milliseconds (default: 1000)
/// * `max_reconnect_interval_secs` - Upper bound of the reconnection backoff (default: 60)
/// * `enable_register` - Address of the detection enable register (default: 7)
/// * `enable_value_on_connect` - Value written to the enable register after each
///   connection, `None` to leave it untouched (default: 1)
///
/// # Example
///
/// ```
/// use belt_monitor::config::ModbusConfig;
///
/// let modbus_config = ModbusConfig {
///     address: "192.168.1.10".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(modbus_config.port, 502);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_reconnect_interval_secs")]
    pub max_reconnect_interval_secs: u64,
    #[serde(default = "default_enable_register")]
    pub enable_register: u16,
    #[serde(default = "default_enable_value_on_connect")]
    pub enable_value_on_connect: Option<u16>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_reconnect_interval_secs() -> u64 {
    60
}

fn default_enable_register() -> u16 {
    ENABLE_REGISTER
}

fn default_enable_value_on_connect() -> Option<u16> {
    Some(1)
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 502, // Standard Modbus TCP port
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            max_reconnect_interval_secs: default_max_reconnect_interval_secs(),
            enable_register: default_enable_register(),
            enable_value_on_connect: default_enable_value_on_connect(),
        }
    }
}
