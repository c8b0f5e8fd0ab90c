// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated belt PLC
//!
//! A Modbus TCP server exposing the PLC holding registers `0..=9` with the detection
//! enable register preset to all features on. It stands in for the real controller in
//! integration tests and from the `plc_simulator` binary.
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client": the simulator is the server (Modbus slave), the
//! alarm bridge is the client (Modbus master).

use std::{
    collections::HashMap,
    future,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::Result;
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use super::register_map::{ALL_FEATURES_ENABLED, ENABLE_REGISTER, LAST_REGISTER};

/// Shared holding register bank of the simulated PLC.
///
/// Clones share the same registers, so a test can keep a handle and inspect what the
/// client wrote.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    history: Arc<Mutex<Vec<(u16, u16)>>>,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBank {
    /// Registers `0..=9` zeroed, enable register set to all features on.
    pub fn new() -> Self {
        let mut registers: HashMap<u16, u16> = (0..=LAST_REGISTER).map(|a| (a, 0)).collect();
        registers.insert(ENABLE_REGISTER, ALL_FEATURES_ENABLED);
        Self {
            registers: Arc::new(Mutex::new(registers)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn registers(&self) -> MutexGuard<'_, HashMap<u16, u16>> {
        self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, Vec<(u16, u16)>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.registers().get(&address).copied()
    }

    /// Set a register from the PLC side, bypassing the write history.
    pub fn set(&self, address: u16, value: u16) {
        self.registers().insert(address, value);
    }

    pub fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        register_read(&self.registers(), address, count)
    }

    /// Write registers as a Modbus client would, recording each write.
    pub fn write(&self, address: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        register_write(&mut self.registers(), address, values)?;
        let mut history = self.history();
        for (offset, value) in values.iter().enumerate() {
            history.push((address + offset as u16, *value));
        }
        Ok(())
    }

    /// Client writes in arrival order as `(address, value)`.
    pub fn write_history(&self) -> Vec<(u16, u16)> {
        self.history().clone()
    }

    pub fn clear_history(&self) {
        self.history().clear();
    }
}

/// Modbus service answering from a [`RegisterBank`].
pub struct PlcSimulatorService {
    bank: RegisterBank,
}

impl PlcSimulatorService {
    pub fn new(bank: RegisterBank) -> Self {
        Self { bank }
    }
}

impl tokio_modbus::server::Service for PlcSimulatorService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .bank
                .read(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::WriteMultipleRegisters(addr, values) => self
                .bank
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::WriteSingleRegister(addr, value) => self
                .bank
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            _ => {
                error!("SIMULATOR: Exception::IllegalFunction - Unimplemented function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

fn register_read(
    registers: &HashMap<u16, u16>,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    (0..cnt)
        .map(|i| {
            addr.checked_add(i)
                .and_then(|reg_addr| registers.get(&reg_addr).copied())
                .ok_or_else(|| {
                    debug!("SIMULATOR: Exception::IllegalDataAddress on read at {addr}+{i}");
                    ExceptionCode::IllegalDataAddress
                })
        })
        .collect()
}

/// Write holding registers, all or nothing.
fn register_write(
    registers: &mut HashMap<u16, u16>,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    let in_range = (0..values.len()).all(|i| {
        u16::try_from(i)
            .ok()
            .and_then(|i| addr.checked_add(i))
            .is_some_and(|reg_addr| registers.contains_key(&reg_addr))
    });
    if !in_range {
        debug!("SIMULATOR: Exception::IllegalDataAddress on write at {addr}");
        return Err(ExceptionCode::IllegalDataAddress);
    }
    for (i, value) in values.iter().enumerate() {
        registers.insert(addr + i as u16, *value);
    }
    Ok(())
}

/// Bind the simulator on `socket_addr` and serve it in a background task.
///
/// Returns the bound address, useful with port `0`, and the server task handle.
pub async fn start_plc_simulator(
    socket_addr: SocketAddr,
    bank: RegisterBank,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(socket_addr).await?;
    let local_addr = listener.local_addr()?;
    let server = Server::new(listener);

    let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
        let bank = bank.clone();
        debug!("SIMULATOR: client connected from {socket_addr}");
        async move {
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(PlcSimulatorService::new(bank.clone())))
            })
        }
    };

    let on_process_error = |err| {
        error!("PLC simulator error: {err}");
    };

    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            error!("PLC simulator error: {}", e);
        }
    });

    info!("PLC simulator listening on {}", local_addr);
    Ok((local_addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_preset() {
        let bank = RegisterBank::new();
        assert_eq!(bank.read(0, 10).unwrap().len(), 10);
        assert_eq!(bank.get(ENABLE_REGISTER), Some(ALL_FEATURES_ENABLED));
        assert_eq!(bank.read(5, 6), Err(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn test_write_is_all_or_nothing() {
        let bank = RegisterBank::new();
        assert_eq!(
            bank.write(8, &[1, 2, 3]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(bank.get(8), Some(0));
        assert!(bank.write_history().is_empty());

        bank.write(3, &[1]).unwrap();
        assert_eq!(bank.get(3), Some(1));
        assert_eq!(bank.write_history(), vec![(3, 1)]);
    }

    #[test]
    fn test_clones_share_registers() {
        let bank = RegisterBank::new();
        let handle = bank.clone();
        handle.set(ENABLE_REGISTER, 0x02);
        assert_eq!(bank.get(ENABLE_REGISTER), Some(0x02));
        assert!(bank.write_history().is_empty());
    }
}
