// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC client used by the alarm pipeline
//!
//! [`PlcClient`] owns a [`RegisterBus`] and adds the behaviour the alarm pipeline
//! relies on:
//!
//! - lazy (re)connection with exponential backoff, `min(2^n, max)` seconds after `n`
//!   consecutive failures
//! - writing the configured enable value to the enable register after each connect
//! - write-then-read-back verification of every register write
//! - decoding the detection enable register into [`FeatureToggles`]
//! - alarm register encoding, with transition logging per alarm
//!
//! Only transport faults and timeouts mark the connection as lost. A Modbus
//! exception answer means the link still works.
//!
//! All operations are serialized through an async mutex, so a poll loop and a frame
//! loop can share the client behind an `Arc`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use super::bus::{RegisterBus, TcpRegisterBus};
use super::error::PlcError;
use super::register_map::{EnableBit, FeatureToggles};
use crate::alarm::AlarmKind;
use crate::config::ModbusConfig;

/// Reconnection delay after `consecutive_failures` failed attempts.
pub fn backoff_delay(consecutive_failures: u32, max_interval: Duration) -> Duration {
    let secs = 1u64.checked_shl(consecutive_failures).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(max_interval)
}

/// Register value written for an alarm.
///
/// Inactive alarms write `0`. Coal fill carries its ratio in per-mille, every other
/// active alarm writes `1`.
pub fn encode_alarm_value(kind: AlarmKind, confidence: f64, active: bool) -> u16 {
    match (kind, active) {
        (_, false) => 0,
        (AlarmKind::CoalFill, true) => {
            let ratio = if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            };
            (ratio * 1000.0).round() as u16
        }
        (_, true) => 1,
    }
}

/// Outcome of the read-back following a register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCheck {
    /// Read-back returned the written value.
    Verified,
    /// Read-back returned something else; the write itself succeeded.
    Mismatch { expected: u16, actual: u16 },
    /// Read-back answered with an exception or no value; the write itself succeeded.
    Unverified,
}

/// Connection bookkeeping of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub connected: bool,
    pub consecutive_failures: u32,
    pub last_attempt: Option<Instant>,
}

struct PlcInner {
    bus: Box<dyn RegisterBus>,
    state: ConnectionState,
    last_enable_raw: Option<u16>,
    alarm_states: BTreeMap<AlarmKind, bool>,
}

/// Serialized access to the belt PLC.
pub struct PlcClient {
    inner: Mutex<PlcInner>,
    max_reconnect_interval: Duration,
    enable_register: u16,
    enable_value_on_connect: Option<u16>,
}

impl PlcClient {
    /// Client over an arbitrary bus.
    pub fn new(bus: Box<dyn RegisterBus>, config: &ModbusConfig) -> Self {
        Self {
            inner: Mutex::new(PlcInner {
                bus,
                state: ConnectionState::default(),
                last_enable_raw: None,
                alarm_states: BTreeMap::new(),
            }),
            max_reconnect_interval: Duration::from_secs(config.max_reconnect_interval_secs),
            enable_register: config.enable_register,
            enable_value_on_connect: config.enable_value_on_connect,
        }
    }

    /// Client over Modbus TCP as configured.
    pub fn from_config(config: &ModbusConfig) -> Self {
        Self::new(Box::new(TcpRegisterBus::from_config(config)), config)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    pub async fn endpoint(&self) -> String {
        self.inner.lock().await.bus.endpoint()
    }

    /// Connect now, ignoring the backoff delay. No-op while already connected.
    pub async fn connect(&self) -> Result<(), PlcError> {
        let mut inner = self.inner.lock().await;
        if inner.state.connected {
            return Ok(());
        }
        self.connect_locked(&mut inner).await
    }

    async fn connect_locked(&self, inner: &mut PlcInner) -> Result<(), PlcError> {
        inner.state.last_attempt = Some(Instant::now());
        match inner.bus.connect().await {
            Ok(()) => {
                if let Some(value) = self.enable_value_on_connect {
                    match inner.bus.write_single_register(self.enable_register, value).await {
                        Ok(()) => debug!(
                            "Enable register {} set to {:#06x}",
                            self.enable_register, value
                        ),
                        Err(e) if e.is_transport_fault() => {
                            inner.state.connected = false;
                            inner.state.consecutive_failures =
                                inner.state.consecutive_failures.saturating_add(1);
                            warn!(
                                "PLC connection attempt {} failed while initialising enable register: {}",
                                inner.state.consecutive_failures, e
                            );
                            return Err(e);
                        }
                        Err(e) => warn!("Failed to initialise enable register: {}", e),
                    }
                }
                inner.state.connected = true;
                inner.state.consecutive_failures = 0;
                info!("Connected to PLC at {}", inner.bus.endpoint());
                Ok(())
            }
            Err(e) => {
                inner.state.connected = false;
                inner.state.consecutive_failures = inner.state.consecutive_failures.saturating_add(1);
                warn!(
                    "PLC connection attempt {} failed: {}",
                    inner.state.consecutive_failures, e
                );
                Err(e)
            }
        }
    }

    async fn ensure_connected(&self, inner: &mut PlcInner) -> Result<(), PlcError> {
        if inner.state.connected {
            return Ok(());
        }
        let delay = backoff_delay(inner.state.consecutive_failures, self.max_reconnect_interval);
        if let Some(last) = inner.state.last_attempt {
            let elapsed = last.elapsed();
            if inner.state.consecutive_failures > 0 && elapsed < delay {
                return Err(PlcError::Backoff {
                    retry_in: delay - elapsed,
                });
            }
        }
        self.connect_locked(inner).await
    }

    fn note_failure(inner: &mut PlcInner, error: &PlcError) {
        if error.is_transport_fault() && inner.state.connected {
            error!("PLC link lost: {}", error);
            inner.state.connected = false;
        }
    }

    async fn read_locked(
        &self,
        inner: &mut PlcInner,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PlcError> {
        self.ensure_connected(inner).await?;
        match inner.bus.read_holding_registers(address, count).await {
            Ok(values) => Ok(values),
            Err(e) => {
                Self::note_failure(inner, &e);
                Err(e)
            }
        }
    }

    async fn write_locked(
        &self,
        inner: &mut PlcInner,
        address: u16,
        value: u16,
    ) -> Result<WriteCheck, PlcError> {
        self.ensure_connected(inner).await?;
        if let Err(e) = inner.bus.write_single_register(address, value).await {
            Self::note_failure(inner, &e);
            return Err(e);
        }

        match inner.bus.read_holding_registers(address, 1).await {
            Ok(values) => match values.first() {
                Some(&actual) if actual == value => Ok(WriteCheck::Verified),
                Some(&actual) => {
                    warn!(
                        "Register {} read back {} after writing {}",
                        address, actual, value
                    );
                    Ok(WriteCheck::Mismatch {
                        expected: value,
                        actual,
                    })
                }
                None => Ok(WriteCheck::Unverified),
            },
            Err(e) if e.is_transport_fault() => {
                Self::note_failure(inner, &e);
                Err(e)
            }
            Err(e) => {
                debug!("Read-back of register {} failed: {}", address, e);
                Ok(WriteCheck::Unverified)
            }
        }
    }

    /// Write one holding register, clamping `value` into `0..=65535`.
    pub async fn write_register(&self, address: u16, value: i64) -> Result<WriteCheck, PlcError> {
        let clamped = value.clamp(0, i64::from(u16::MAX)) as u16;
        if i64::from(clamped) != value {
            warn!(
                "Value {} clamped to {} for register {}",
                value, clamped, address
            );
        }
        let mut inner = self.inner.lock().await;
        self.write_locked(&mut inner, address, clamped).await
    }

    async fn read_one_locked(&self, inner: &mut PlcInner, address: u16) -> Result<u16, PlcError> {
        let values = self.read_locked(inner, address, 1).await?;
        values.first().copied().ok_or(PlcError::Exception {
            address,
            code: "empty response".to_string(),
        })
    }

    pub async fn read_register(&self, address: u16) -> Result<u16, PlcError> {
        let mut inner = self.inner.lock().await;
        self.read_one_locked(&mut inner, address).await
    }

    /// Read `count` holding registers starting at `start`.
    pub async fn dump_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, PlcError> {
        let mut inner = self.inner.lock().await;
        self.read_locked(&mut inner, start, count).await
    }

    /// Read and decode the enable register, `None` when the read fails.
    ///
    /// A successful read becomes the reference value for [`Self::poll_for_change`].
    pub async fn enable_snapshot(&self) -> Option<FeatureToggles> {
        let mut inner = self.inner.lock().await;
        match self.read_one_locked(&mut inner, self.enable_register).await {
            Ok(raw) => {
                inner.last_enable_raw = Some(raw);
                Some(FeatureToggles::from_raw(raw))
            }
            Err(e) => {
                warn!("Cannot read detection enable register: {}", e);
                None
            }
        }
    }

    /// Decoded toggles when the enable register changed since the last read.
    pub async fn poll_for_change(&self) -> Option<FeatureToggles> {
        let mut inner = self.inner.lock().await;
        let raw = match self.read_one_locked(&mut inner, self.enable_register).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Enable register poll failed: {}", e);
                return None;
            }
        };
        let previous = inner.last_enable_raw.replace(raw);
        if previous == Some(raw) {
            return None;
        }
        info!(
            "Detection enable mask changed: {} -> {:#06x}",
            previous.map_or_else(|| "unknown".to_string(), |p| format!("{p:#06x}")),
            raw
        );
        Some(FeatureToggles::from_raw(raw))
    }

    /// Whether a single detection feature is enabled.
    ///
    /// Reads the register directly and leaves the value [`Self::poll_for_change`]
    /// compares against untouched. A failed read answers `true`, so detection keeps
    /// running while the PLC is unreachable.
    pub async fn is_bit_enabled(&self, bit: EnableBit) -> bool {
        match self.read_register(self.enable_register).await {
            Ok(raw) => raw & bit.mask() != 0,
            Err(e) => {
                warn!(
                    "Cannot read enable bit '{}' ({}), assuming enabled",
                    bit.label(),
                    e
                );
                true
            }
        }
    }

    /// Write the register of `kind`.
    pub async fn send_alarm(
        &self,
        kind: AlarmKind,
        confidence: f64,
        active: bool,
    ) -> Result<WriteCheck, PlcError> {
        let value = encode_alarm_value(kind, confidence, active);
        let mut inner = self.inner.lock().await;
        let check = self.write_locked(&mut inner, kind.register(), value).await?;

        let was_active = inner.alarm_states.insert(kind, active).unwrap_or(false);
        if kind != AlarmKind::CoalFill && was_active != active {
            if active {
                info!("Alarm '{}' raised (confidence {:.2})", kind, confidence);
            } else {
                info!("Alarm '{}' cleared", kind);
            }
        }
        Ok(check)
    }

    /// Alarms last written as active.
    pub async fn active_alarms(&self) -> Vec<AlarmKind> {
        self.inner
            .lock()
            .await
            .alarm_states
            .iter()
            .filter_map(|(kind, active)| active.then_some(*kind))
            .collect()
    }

    /// Write `0` to every alarm currently marked active.
    ///
    /// Every active alarm is attempted; the first error is returned.
    pub async fn clear_all(&self) -> Result<(), PlcError> {
        let mut inner = self.inner.lock().await;
        let active: Vec<AlarmKind> = inner
            .alarm_states
            .iter()
            .filter_map(|(kind, active)| active.then_some(*kind))
            .collect();

        let mut first_error = None;
        let mut cleared = 0;
        for kind in active {
            match self.write_locked(&mut inner, kind.register(), 0).await {
                Ok(_) => {
                    inner.alarm_states.insert(kind, false);
                    cleared += 1;
                }
                Err(e) => {
                    warn!("Failed to clear alarm '{}': {}", kind, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if cleared > 0 {
            info!("Cleared {} alarm registers", cleared);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Clear active alarms, then close the connection.
    pub async fn disconnect(&self) {
        if let Err(e) = self.clear_all().await {
            warn!("Alarms left active on disconnect: {}", e);
        }
        let mut inner = self.inner.lock().await;
        inner.bus.disconnect().await;
        inner.state.connected = false;
        info!("Disconnected from PLC at {}", inner.bus.endpoint());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::bus::{FaultPlan, SimulatedRegisterBus};
    use crate::modbus::plc_simulator::RegisterBank;
    use crate::modbus::register_map::{COAL_FILL_REGISTER, ENABLE_REGISTER, SMOKE_REGISTER};

    type SharedFaults = std::sync::Arc<std::sync::Mutex<FaultPlan>>;

    fn client_with_faults() -> (PlcClient, RegisterBank, SharedFaults) {
        let bank = RegisterBank::new();
        let bus = SimulatedRegisterBus::new(bank.clone());
        let faults = bus.faults();
        let client = PlcClient::new(Box::new(bus), &ModbusConfig::default());
        (client, bank, faults)
    }

    fn simulated() -> (PlcClient, RegisterBank) {
        let (client, bank, _) = client_with_faults();
        (client, bank)
    }

    #[test]
    fn test_backoff_delay() {
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(3, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(10, max), Duration::from_secs(60));
        assert_eq!(backoff_delay(200, max), Duration::from_secs(60));
    }

    #[test]
    fn test_alarm_encoding() {
        assert_eq!(encode_alarm_value(AlarmKind::CoalFill, 0.734, true), 734);
        assert_eq!(encode_alarm_value(AlarmKind::CoalFill, 1.5, true), 1000);
        assert_eq!(encode_alarm_value(AlarmKind::CoalFill, 0.734, false), 0);
        assert_eq!(encode_alarm_value(AlarmKind::Smoke, 0.9, true), 1);
        assert_eq!(encode_alarm_value(AlarmKind::Smoke, 0.9, false), 0);
    }

    #[tokio::test]
    async fn test_connect_writes_enable_value() {
        let (client, bank) = simulated();
        client.connect().await.unwrap();
        assert!(client.connection_state().await.connected);
        assert_eq!(bank.get(ENABLE_REGISTER), Some(1));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (client, _bank, faults) = client_with_faults();
        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(faults.lock().unwrap().connect_attempts, 1);
    }

    #[tokio::test]
    async fn test_write_is_verified() {
        let (client, bank) = simulated();
        let check = client.write_register(5, 1234).await.unwrap();
        assert_eq!(check, WriteCheck::Verified);
        assert_eq!(bank.get(5), Some(1234));
    }

    #[tokio::test]
    async fn test_write_clamps_out_of_range_values() {
        let (client, bank) = simulated();
        client.write_register(5, 70_000).await.unwrap();
        assert_eq!(bank.get(5), Some(u16::MAX));
        client.write_register(5, -3).await.unwrap();
        assert_eq!(bank.get(5), Some(0));
    }

    #[tokio::test]
    async fn test_read_back_mismatch_is_reported() {
        let (client, _bank, faults) = client_with_faults();
        faults.lock().unwrap().stuck_registers.push(6);
        let check = client.write_register(6, 42).await.unwrap();
        assert_eq!(
            check,
            WriteCheck::Mismatch {
                expected: 42,
                actual: 0
            }
        );
        assert!(client.connection_state().await.connected);
    }

    #[tokio::test]
    async fn test_read_back_transport_fault_fails_the_write() {
        let (client, bank, faults) = client_with_faults();
        client.connect().await.unwrap();
        faults.lock().unwrap().failing_reads = 1;

        let err = client
            .send_alarm(AlarmKind::Smoke, 0.9, true)
            .await
            .unwrap_err();
        assert!(err.is_transport_fault());
        assert!(!client.connection_state().await.connected);
        // The write reached the PLC but the alarm is not recorded as active
        assert_eq!(bank.get(SMOKE_REGISTER), Some(1));
        assert!(client.active_alarms().await.is_empty());
    }

    #[tokio::test]
    async fn test_enable_write_fault_counts_as_failed_connect() {
        let (client, _bank, faults) = client_with_faults();
        faults.lock().unwrap().failing_writes = 1;

        let err = client.connect().await.unwrap_err();
        assert!(err.is_transport_fault());
        let state = client.connection_state().await;
        assert!(!state.connected);
        assert_eq!(state.consecutive_failures, 1);
        assert!(matches!(
            client.read_register(0).await,
            Err(PlcError::Backoff { .. })
        ));
    }

    #[tokio::test]
    async fn test_exception_keeps_connection() {
        let (client, _bank) = simulated();
        let err = client.read_register(300).await.unwrap_err();
        assert!(matches!(err, PlcError::Exception { address: 300, .. }));
        assert!(client.connection_state().await.connected);
    }

    #[tokio::test]
    async fn test_transport_fault_then_reconnect() {
        let (client, bank, faults) = client_with_faults();
        client.connect().await.unwrap();
        faults.lock().unwrap().failing_reads = 1;

        assert!(client.read_register(0).await.unwrap_err().is_transport_fault());
        assert!(!client.connection_state().await.connected);

        // no failed connection attempt yet, so the next call reconnects at once
        bank.set(0, 77);
        assert_eq!(client.read_register(0).await.unwrap(), 77);
        assert_eq!(faults.lock().unwrap().connect_attempts, 2);
    }

    #[tokio::test]
    async fn test_unreachable_plc_backs_off() {
        let (client, _bank, faults) = client_with_faults();
        faults.lock().unwrap().unreachable = true;

        let err = client.write_register(3, 1).await.unwrap_err();
        assert!(matches!(err, PlcError::Connection { .. }));
        let err = client.write_register(3, 1).await.unwrap_err();
        assert!(matches!(err, PlcError::Backoff { .. }));

        let state = client.connection_state().await;
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(faults.lock().unwrap().connect_attempts, 1);

        // an explicit connect ignores the backoff
        faults.lock().unwrap().unreachable = false;
        client.connect().await.unwrap();
        assert_eq!(client.connection_state().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_enable_snapshot_and_change_detection() {
        let (client, bank) = simulated();
        bank.set(ENABLE_REGISTER, 0x05);
        // connect rewrites the enable register, so connect first
        client.connect().await.unwrap();
        bank.set(ENABLE_REGISTER, 0x05);

        let snapshot = client.enable_snapshot().await.unwrap();
        assert!(snapshot.large_lump && snapshot.personnel_boundary);
        assert!(!snapshot.foreign_object && !snapshot.deviation);

        assert_eq!(client.poll_for_change().await, None);
        bank.set(ENABLE_REGISTER, 0x0F);
        assert_eq!(
            client.poll_for_change().await,
            Some(FeatureToggles::all_enabled())
        );
        assert_eq!(client.poll_for_change().await, None);
    }

    #[tokio::test]
    async fn test_bit_check_leaves_change_detection_intact() {
        let (client, bank) = simulated();
        client.connect().await.unwrap();
        bank.set(ENABLE_REGISTER, 0x0F);
        assert_eq!(
            client.poll_for_change().await,
            Some(FeatureToggles::all_enabled())
        );

        // Operator switches deviation off, the frame loop notices first
        bank.set(ENABLE_REGISTER, 0x07);
        assert!(!client.is_bit_enabled(EnableBit::Deviation).await);
        assert_eq!(
            client.poll_for_change().await,
            Some(FeatureToggles::from_raw(0x07))
        );
        assert_eq!(client.poll_for_change().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_polls_report_a_change_once() {
        let (client, bank) = simulated();
        let client = std::sync::Arc::new(client);
        client.connect().await.unwrap();
        client.poll_for_change().await;

        bank.set(ENABLE_REGISTER, 0x03);
        let polls: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.poll_for_change().await })
            })
            .collect();
        let mut changes = 0;
        for poll in polls {
            if poll.await.unwrap().is_some() {
                changes += 1;
            }
        }
        assert_eq!(changes, 1);
    }

    #[tokio::test]
    async fn test_is_bit_enabled_fails_open() {
        let (client, bank, faults) = client_with_faults();
        client.connect().await.unwrap();
        bank.set(ENABLE_REGISTER, 0x02);
        assert!(client.is_bit_enabled(EnableBit::ForeignObject).await);
        assert!(!client.is_bit_enabled(EnableBit::Deviation).await);

        faults.lock().unwrap().failing_reads = 1;
        assert!(client.is_bit_enabled(EnableBit::Deviation).await);
    }

    #[tokio::test]
    async fn test_send_alarm_and_clear_all_only_touches_active() {
        let (client, bank) = simulated();
        client.connect().await.unwrap();
        bank.clear_history();

        client.send_alarm(AlarmKind::Smoke, 0.9, true).await.unwrap();
        client.send_alarm(AlarmKind::CoalFill, 0.42, true).await.unwrap();
        assert_eq!(bank.get(SMOKE_REGISTER), Some(1));
        assert_eq!(bank.get(COAL_FILL_REGISTER), Some(420));
        assert_eq!(
            client.active_alarms().await,
            vec![AlarmKind::CoalFill, AlarmKind::Smoke]
        );

        bank.clear_history();
        client.clear_all().await.unwrap();
        let mut history = bank.write_history();
        history.sort();
        assert_eq!(history, vec![(COAL_FILL_REGISTER, 0), (SMOKE_REGISTER, 0)]);
        assert!(client.active_alarms().await.is_empty());

        bank.clear_history();
        client.clear_all().await.unwrap();
        assert!(bank.write_history().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_clears_alarms() {
        let (client, bank) = simulated();
        client.send_alarm(AlarmKind::Personnel, 0.8, true).await.unwrap();
        client.disconnect().await;
        assert_eq!(bank.get(4), Some(0));
        assert!(!client.connection_state().await.connected);
    }
}
