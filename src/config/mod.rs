// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the belt monitor
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and validated
//! against an embedded JSON schema before it is deserialized.
//!
//! ## Configuration Structure
//!
//! - `modbus`: link to the belt PLC
//! - `detection`: thresholds applied to the vision model output
//! - `alarm`: cooldown and fill ratio publication
//! - `event_sink`: HTTP backend receiving alarm events
//! - `telemetry`: per-frame telemetry broadcast
//! - `daemon`: timing of the background loops
//!
//! ## Usage
//!
//! ```no_run
//! use belt_monitor::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("192.168.1.10".to_string()), // PLC address
//!     Some(502),                        // PLC port
//!     None,                             // Camera id
//!     Some(10),                         // Cooldown minutes
//!     None,                             // Event backend URL
//!     Some(true),                       // Report events to the backend
//! );
//!
//! println!("PLC: {}:{}", config.modbus.address, config.modbus.port);
//! ```

pub mod alarm;
pub mod daemon;
pub mod detection;
pub mod event_sink;
pub mod modbus;
pub mod telemetry;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use alarm::AlarmConfig;
pub use daemon::DaemonConfig;
pub use detection::DetectionConfig;
pub use event_sink::EventSinkConfig;
pub use modbus::ModbusConfig;
pub use telemetry::TelemetryConfig;
pub use utils::{is_valid_ip_address, output_config_schema};

/// Root configuration structure of the belt monitor.
///
/// Every section falls back to its defaults when missing from the file, allowing a
/// minimal configuration that only sets what differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// PLC connection settings.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Detection thresholds and camera geometry.
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Alarm cooldown and fill ratio publication.
    #[serde(default)]
    pub alarm: AlarmConfig,

    /// Alarm event backend.
    #[serde(default)]
    pub event_sink: EventSinkConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file, writing the defaults when it does not exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // YAML to a generic value, then JSON for schema validation
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let validator = utils::schema_validator()?;
        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only arguments that were provided override the loaded values.
    ///
    /// # Parameters
    ///
    /// * `modbus_address` - PLC host name or address
    /// * `modbus_port` - PLC Modbus TCP port
    /// * `camera_id` - Camera identifier reported with events
    /// * `cooldown_minutes` - Alarm cooldown period
    /// * `event_base_url` - Base URL of the alarm event backend
    /// * `report_events` - Enable or disable the HTTP event backend
    pub fn apply_args(
        &mut self,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        camera_id: Option<u32>,
        cooldown_minutes: Option<u64>,
        event_base_url: Option<String>,
        report_events: Option<bool>,
    ) {
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(camera_id) = camera_id {
            debug!("Overriding camera id from command line: {}", camera_id);
            self.detection.camera_id = camera_id;
        }
        if let Some(minutes) = cooldown_minutes {
            debug!("Overriding alarm cooldown from command line: {} min", minutes);
            self.alarm.cooldown_minutes = minutes;
        }
        if let Some(url) = event_base_url {
            debug!("Overriding event backend URL from command line: {}", url);
            self.event_sink.base_url = url;
        }
        if let Some(enabled) = report_events {
            debug!("Overriding event reporting from command line: {}", enabled);
            self.event_sink.enabled = enabled;
        }
    }
}
