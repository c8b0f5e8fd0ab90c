// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! Runs the belt monitor services as background tasks and shuts them down together.
//!
//! ## Usage
//!
//! ```no_run
//! use belt_monitor::{config::Config, daemon::Daemon, source::JsonLinesSource};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     let source = JsonLinesSource::open("frames.jsonl").await?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config, Box::new(source), None).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;

pub use launch_daemon::Daemon;
