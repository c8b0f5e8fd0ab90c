// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register bus abstraction
//!
//! [`RegisterBus`] is the raw holding-register transport used by the PLC client.
//! [`TcpRegisterBus`] talks Modbus TCP through `tokio-modbus`;
//! [`SimulatedRegisterBus`] works on an in-memory [`RegisterBank`] and can inject
//! faults, which lets the client state machine be tested without sockets.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use super::error::PlcError;
use super::plc_simulator::RegisterBank;
use crate::config::ModbusConfig;

/// Holding register transport.
#[async_trait]
pub trait RegisterBus: Send {
    /// Open the underlying connection.
    async fn connect(&mut self) -> Result<(), PlcError>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PlcError>;

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), PlcError>;

    /// Close the connection, ignoring errors.
    async fn disconnect(&mut self);

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// Modbus TCP transport.
pub struct TcpRegisterBus {
    address: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    ctx: Option<Context>,
}

impl TcpRegisterBus {
    pub fn new(address: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            port,
            unit_id,
            timeout,
            ctx: None,
        }
    }

    pub fn from_config(config: &ModbusConfig) -> Self {
        Self::new(
            config.address.clone(),
            config.port,
            config.unit_id,
            Duration::from_millis(config.timeout_ms),
        )
    }

    fn connection_error(&self, reason: String) -> PlcError {
        PlcError::Connection {
            endpoint: self.endpoint(),
            reason,
        }
    }
}

/// Resolve `host:port` to its first socket address.
///
/// Takes owned values: the bus holds a client context that is not `Sync`, so it must
/// not be borrowed across the lookup.
async fn resolve(host: String, port: u16) -> Result<SocketAddr, String> {
    tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| "address did not resolve".to_string())
}

#[async_trait]
impl RegisterBus for TcpRegisterBus {
    async fn connect(&mut self) -> Result<(), PlcError> {
        self.disconnect().await;
        let socket_addr = resolve(self.address.clone(), self.port)
            .await
            .map_err(|reason| self.connection_error(reason))?;
        debug!("Connecting to PLC at {}", socket_addr);
        match timeout(
            self.timeout,
            tcp::connect_slave(socket_addr, Slave(self.unit_id)),
        )
        .await
        {
            Ok(Ok(ctx)) => {
                self.ctx = Some(ctx);
                Ok(())
            }
            Ok(Err(e)) => Err(self.connection_error(e.to_string())),
            Err(_) => Err(self.connection_error("connection timed out".to_string())),
        }
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PlcError> {
        let ctx = self.ctx.as_mut().ok_or(PlcError::NotConnected)?;
        let result = timeout(self.timeout, ctx.read_holding_registers(address, count)).await;
        match result {
            Ok(Ok(Ok(values))) => Ok(values),
            Ok(Ok(Err(code))) => Err(PlcError::Exception {
                address,
                code: format!("{code:?}"),
            }),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(PlcError::Transport {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.ctx = None;
                Err(PlcError::Timeout { address })
            }
        }
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), PlcError> {
        let ctx = self.ctx.as_mut().ok_or(PlcError::NotConnected)?;
        let result = timeout(self.timeout, ctx.write_single_register(address, value)).await;
        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(code))) => Err(PlcError::Exception {
                address,
                code: format!("{code:?}"),
            }),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(PlcError::Transport {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.ctx = None;
                Err(PlcError::Timeout { address })
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{} (unit {})", self.address, self.port, self.unit_id)
    }
}

/// Faults injected into a [`SimulatedRegisterBus`].
#[derive(Debug, Default, Clone)]
pub struct FaultPlan {
    /// Refuse connection attempts.
    pub unreachable: bool,
    /// Fail the next `n` reads with a transport fault.
    pub failing_reads: u32,
    /// Fail the next `n` writes with a transport fault.
    pub failing_writes: u32,
    /// Registers that accept writes but keep their value.
    pub stuck_registers: Vec<u16>,
    /// Connection attempts seen so far.
    pub connect_attempts: u32,
}

/// In-memory bus over a [`RegisterBank`].
pub struct SimulatedRegisterBus {
    bank: RegisterBank,
    faults: Arc<Mutex<FaultPlan>>,
    connected: bool,
}

impl SimulatedRegisterBus {
    pub fn new(bank: RegisterBank) -> Self {
        Self {
            bank,
            faults: Arc::new(Mutex::new(FaultPlan::default())),
            connected: false,
        }
    }

    /// Shared handle to the fault plan, for tests.
    pub fn faults(&self) -> Arc<Mutex<FaultPlan>> {
        self.faults.clone()
    }

    fn plan(&self) -> MutexGuard<'_, FaultPlan> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drop_link(&mut self, address: u16) -> PlcError {
        self.connected = false;
        PlcError::Transport {
            address,
            reason: "simulated link failure".to_string(),
        }
    }
}

#[async_trait]
impl RegisterBus for SimulatedRegisterBus {
    async fn connect(&mut self) -> Result<(), PlcError> {
        let unreachable = {
            let mut plan = self.plan();
            plan.connect_attempts += 1;
            plan.unreachable
        };
        if unreachable {
            self.connected = false;
            return Err(PlcError::Connection {
                endpoint: self.endpoint(),
                reason: "simulated PLC unreachable".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PlcError> {
        if !self.connected {
            return Err(PlcError::NotConnected);
        }
        let fail = {
            let mut plan = self.plan();
            let fail = plan.failing_reads > 0;
            plan.failing_reads = plan.failing_reads.saturating_sub(1);
            fail
        };
        if fail {
            return Err(self.drop_link(address));
        }
        self.bank
            .read(address, count)
            .map_err(|code| PlcError::Exception {
                address,
                code: format!("{code:?}"),
            })
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), PlcError> {
        if !self.connected {
            return Err(PlcError::NotConnected);
        }
        let (fail, stuck) = {
            let mut plan = self.plan();
            let fail = plan.failing_writes > 0;
            plan.failing_writes = plan.failing_writes.saturating_sub(1);
            (fail, plan.stuck_registers.contains(&address))
        };
        if fail {
            return Err(self.drop_link(address));
        }
        if stuck {
            return Ok(());
        }
        self.bank
            .write(address, &[value])
            .map_err(|code| PlcError::Exception {
                address,
                code: format!("{code:?}"),
            })
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn endpoint(&self) -> String {
        "simulated PLC".to_string()
    }
}
