// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Holding register layout of the belt PLC
//!
//! | Register | Display | Content                                   |
//! |----------|---------|-------------------------------------------|
//! | 0        | 40001   | Coal fill ratio, per-mille of a full belt |
//! | 1        | 40002   | Belt deviation alarm                      |
//! | 2        | 40003   | Large lump alarm                          |
//! | 3        | 40004   | Smoke alarm                               |
//! | 4        | 40005   | Personnel intrusion alarm                 |
//! | 7        | 40008   | Detection enable bitmask                  |
//! | 8        | 40009   | Foreign object alarm                      |
//!
//! Alarm registers hold `1` while the alarm is active and `0` otherwise.

use crate::alarm::AlarmKind;

pub const COAL_FILL_REGISTER: u16 = 0;
pub const DEVIATION_REGISTER: u16 = 1;
pub const LARGE_LUMP_REGISTER: u16 = 2;
pub const SMOKE_REGISTER: u16 = 3;
pub const PERSONNEL_REGISTER: u16 = 4;
pub const ENABLE_REGISTER: u16 = 7;
pub const FOREIGN_OBJECT_REGISTER: u16 = 8;

/// Highest register implemented by the PLC program.
pub const LAST_REGISTER: u16 = 9;

/// Offset between protocol addresses and the 4xxxx display addresses.
pub const DISPLAY_BASE: u32 = 40001;

/// Enable mask with every detection feature switched on.
pub const ALL_FEATURES_ENABLED: u16 = 0x0F;

/// Register written for a given alarm kind.
pub fn alarm_register(kind: AlarmKind) -> u16 {
    match kind {
        AlarmKind::CoalFill => COAL_FILL_REGISTER,
        AlarmKind::Deviation => DEVIATION_REGISTER,
        AlarmKind::LargeLump => LARGE_LUMP_REGISTER,
        AlarmKind::Smoke => SMOKE_REGISTER,
        AlarmKind::Personnel => PERSONNEL_REGISTER,
        AlarmKind::ForeignObject => FOREIGN_OBJECT_REGISTER,
    }
}

/// Name of a register for diagnostics output.
pub fn register_name(address: u16) -> Option<&'static str> {
    match address {
        COAL_FILL_REGISTER => Some("coal fill ratio"),
        DEVIATION_REGISTER => Some("belt deviation alarm"),
        LARGE_LUMP_REGISTER => Some("large lump alarm"),
        SMOKE_REGISTER => Some("smoke alarm"),
        PERSONNEL_REGISTER => Some("personnel intrusion alarm"),
        ENABLE_REGISTER => Some("detection enable mask"),
        FOREIGN_OBJECT_REGISTER => Some("foreign object alarm"),
        _ => None,
    }
}

/// Bits of the detection enable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnableBit {
    LargeLump,
    ForeignObject,
    PersonnelBoundary,
    Deviation,
}

impl EnableBit {
    pub const ALL: [EnableBit; 4] = [
        EnableBit::LargeLump,
        EnableBit::ForeignObject,
        EnableBit::PersonnelBoundary,
        EnableBit::Deviation,
    ];

    pub fn mask(self) -> u16 {
        match self {
            EnableBit::LargeLump => 0x01,
            EnableBit::ForeignObject => 0x02,
            EnableBit::PersonnelBoundary => 0x04,
            EnableBit::Deviation => 0x08,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnableBit::LargeLump => "large lump",
            EnableBit::ForeignObject => "foreign object",
            EnableBit::PersonnelBoundary => "personnel boundary",
            EnableBit::Deviation => "belt deviation",
        }
    }
}

/// Decoded detection enable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureToggles {
    pub large_lump: bool,
    pub foreign_object: bool,
    pub personnel_boundary: bool,
    pub deviation: bool,
    /// Raw register value the flags were decoded from.
    pub raw: u16,
}

impl FeatureToggles {
    pub fn from_raw(raw: u16) -> Self {
        Self {
            large_lump: raw & EnableBit::LargeLump.mask() != 0,
            foreign_object: raw & EnableBit::ForeignObject.mask() != 0,
            personnel_boundary: raw & EnableBit::PersonnelBoundary.mask() != 0,
            deviation: raw & EnableBit::Deviation.mask() != 0,
            raw,
        }
    }

    pub fn all_enabled() -> Self {
        Self::from_raw(ALL_FEATURES_ENABLED)
    }

    pub fn is_enabled(&self, bit: EnableBit) -> bool {
        match bit {
            EnableBit::LargeLump => self.large_lump,
            EnableBit::ForeignObject => self.foreign_object,
            EnableBit::PersonnelBoundary => self.personnel_boundary,
            EnableBit::Deviation => self.deviation,
        }
    }
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self::all_enabled()
    }
}
