// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to the belt PLC.
#[derive(Debug, Error)]
pub enum PlcError {
    #[error("cannot connect to PLC at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("PLC reconnection backing off, next attempt in {}s", retry_in.as_secs())]
    Backoff { retry_in: Duration },

    #[error("PLC not connected")]
    NotConnected,

    #[error("transport fault on register {address}: {reason}")]
    Transport { address: u16, reason: String },

    #[error("timeout accessing register {address}")]
    Timeout { address: u16 },

    #[error("PLC exception on register {address}: {code}")]
    Exception { address: u16, code: String },
}

impl PlcError {
    /// Faults after which the connection can no longer be trusted.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            PlcError::Transport { .. } | PlcError::Timeout { .. } | PlcError::NotConnected
        )
    }
}
