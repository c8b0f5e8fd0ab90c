// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::Config;

const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Build the draft 2020-12 validator of the embedded configuration schema.
pub fn schema_validator() -> Result<jsonschema::Validator> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA).with_context(|| {
        debug!("JSON schema string: {}", CONFIG_SCHEMA);
        "Failed to parse JSON schema"
    })?;

    let validator = jsonschema::draft202012::options()
        .should_validate_formats(true)
        .build(&schema)?;
    Ok(validator)
}

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./belt_monitor --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Check if a string is a plausible host name (RFC 1123 labels).
fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **PLC address**: must be an IP address or a valid host name
/// - **Enable register**: must not collide with an alarm register
/// - **Person region**: corners must be ordered (`x1 <= x2`, `y1 <= y2`)
/// - **Event backend**: `base_url` must be an absolute http(s) URL when reporting is enabled
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let address = &config.modbus.address;
    if !is_valid_ip_address(address) && !is_valid_hostname(address) {
        anyhow::bail!("Invalid PLC address: {}", address);
    }

    let enable_register = config.modbus.enable_register;
    if let Some(kind) = crate::alarm::AlarmKind::ALL
        .into_iter()
        .find(|kind| kind.register() == enable_register)
    {
        anyhow::bail!(
            "Enable register {} collides with the '{}' alarm register",
            enable_register,
            kind
        );
    }

    if let Some(region) = &config.detection.person_region {
        if region.x1 > region.x2 || region.y1 > region.y2 {
            anyhow::bail!(
                "Person region corners are not ordered: ({}, {}) - ({}, {})",
                region.x1,
                region.y1,
                region.x2,
                region.y2
            );
        }
    }

    if config.event_sink.enabled {
        let url = reqwest::Url::parse(&config.event_sink.base_url)
            .with_context(|| format!("Invalid event backend URL {}", config.event_sink.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Event backend URL must use http or https: {}", url);
        }
    }

    Ok(())
}
