// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module drives the belt PLC over Modbus TCP: alarm outputs are written to
//! holding registers and the detection enable bitmask is read back from it.
//!
//! ## Key Components
//!
//! - [`PlcClient`]: connection management with exponential backoff, verified register
//!   writes, alarm state tracking and enable register decoding
//! - [`RegisterBus`]: register transport, implemented over TCP by [`TcpRegisterBus`] and
//!   in memory by [`SimulatedRegisterBus`]
//! - [`start_plc_simulator`]: Modbus TCP server emulating the PLC register bank
//!
//! ## Register Map
//!
//! ### Holding Registers (0-based, displayed as 40001+n)
//!
//! - Register 0: Coal fill ratio (per-mille, 0 to 1000)
//! - Register 1: Belt deviation alarm (0/1)
//! - Register 2: Large lump alarm (0/1)
//! - Register 3: Smoke alarm (0/1)
//! - Register 4: Personnel intrusion alarm (0/1)
//! - Register 7: Detection enable bitmask (bit0 large lump, bit1 foreign object,
//!   bit2 personnel boundary, bit3 deviation)
//! - Register 8: Foreign object alarm (0/1)

pub mod bus;
pub mod error;
pub mod plc_client;
pub mod plc_simulator;
pub mod register_map;

pub use bus::{FaultPlan, RegisterBus, SimulatedRegisterBus, TcpRegisterBus};
pub use error::PlcError;
pub use plc_client::{backoff_delay, ConnectionState, PlcClient, WriteCheck};
pub use plc_simulator::{start_plc_simulator, PlcSimulatorService, RegisterBank};
pub use register_map::{EnableBit, FeatureToggles};
