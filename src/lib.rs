// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Belt monitor library
//!
//! Turns per-frame object detections from a conveyor belt camera into PLC alarms over
//! Modbus TCP and alarm events on a supervision backend, and tracks the belt fill ratio.

pub mod alarm;
pub mod config;
pub mod daemon;
pub mod detection;
pub mod event_sink;
pub mod fill_ratio;
pub mod modbus;
pub mod orchestrator;
pub mod source;
pub mod telemetry;
