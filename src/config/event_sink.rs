// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Alarm event backend configuration

use serde::{Deserialize, Serialize};

/// Settings of the HTTP backend receiving alarm events.
///
/// When `enabled` is `false` events are only logged and numbered locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSinkConfig {
    pub enabled: bool,

    /// Base URL of the supervision backend, without trailing path.
    pub base_url: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Prefix of the `picFilePath` sent with each event.
    #[serde(default = "default_pic_path_prefix")]
    pub pic_path_prefix: String,

    /// Directory where alarm images are written after a successful report.
    #[serde(default)]
    pub image_dir: Option<String>,
}

fn default_pic_path_prefix() -> String {
    "assets/images/alarm".to_string()
}

impl Default for EventSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 10,
            pic_path_prefix: default_pic_path_prefix(),
            image_dir: None,
        }
    }
}
