// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the belt-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Alarm rules, decision engine and cooldown gate
//!
//! Detections are mapped onto a fixed table of alarm rules. The rule identifiers are
//! the ones known by the supervision backend:
//!
//! | Rule | Alarm               | Triggering classes       |
//! |------|---------------------|--------------------------|
//! | 1    | Personnel intrusion | personnel                |
//! | 2    | Foreign object      | foreign object           |
//! | 3    | Large lump          | large lump               |
//! | 5    | Belt deviation      | left shaft, right shaft  |
//! | 6    | Smoke               | smoke                    |
//!
//! Coal fill is published to the PLC as a measurement and never raised as an alarm
//! event, so it has no rule.

pub mod cooldown;
pub mod decision;

use std::fmt;
use std::str::FromStr;

use crate::detection::DetectionClass;
use crate::modbus::register_map::{self, alarm_register};

pub use cooldown::CooldownGate;
pub use decision::{decide, AlarmDecision, DecisionParams};

/// Every signal the PLC exposes a register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlarmKind {
    CoalFill,
    Deviation,
    LargeLump,
    Smoke,
    Personnel,
    ForeignObject,
}

impl AlarmKind {
    pub const ALL: [AlarmKind; 6] = [
        AlarmKind::CoalFill,
        AlarmKind::Deviation,
        AlarmKind::LargeLump,
        AlarmKind::Smoke,
        AlarmKind::Personnel,
        AlarmKind::ForeignObject,
    ];

    /// Stable key used for cooldown bookkeeping and logs.
    pub fn key(self) -> &'static str {
        match self {
            AlarmKind::CoalFill => "coal_fill",
            AlarmKind::Deviation => "deviation",
            AlarmKind::LargeLump => "large_lump",
            AlarmKind::Smoke => "smoke",
            AlarmKind::Personnel => "personnel",
            AlarmKind::ForeignObject => "foreign_object",
        }
    }

    pub fn register(self) -> u16 {
        alarm_register(self)
    }

    pub fn rule(self) -> Option<&'static AlarmRule> {
        ALARM_RULES.iter().find(|rule| rule.kind == self)
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown alarm '{0}'")]
pub struct UnknownAlarm(pub String);

impl FromStr for AlarmKind {
    type Err = UnknownAlarm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlarmKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| UnknownAlarm(s.to_string()))
    }
}

/// An alarm known to the supervision backend.
#[derive(Debug, PartialEq, Eq)]
pub struct AlarmRule {
    /// Identifier shared with the backend.
    pub id: u8,
    pub kind: AlarmKind,
    /// Display name sent as the alarm type.
    pub name: &'static str,
    pub register: u16,
}

pub static ALARM_RULES: [AlarmRule; 5] = [
    AlarmRule {
        id: 1,
        kind: AlarmKind::Personnel,
        name: "Personnel intrusion",
        register: register_map::PERSONNEL_REGISTER,
    },
    AlarmRule {
        id: 2,
        kind: AlarmKind::ForeignObject,
        name: "Foreign object",
        register: register_map::FOREIGN_OBJECT_REGISTER,
    },
    AlarmRule {
        id: 3,
        kind: AlarmKind::LargeLump,
        name: "Large lump",
        register: register_map::LARGE_LUMP_REGISTER,
    },
    AlarmRule {
        id: 5,
        kind: AlarmKind::Deviation,
        name: "Belt deviation",
        register: register_map::DEVIATION_REGISTER,
    },
    AlarmRule {
        id: 6,
        kind: AlarmKind::Smoke,
        name: "Smoke",
        register: register_map::SMOKE_REGISTER,
    },
];

/// Rule raised by a detection class, `None` for classes that never alarm.
pub fn rule_for_class(class: DetectionClass) -> Option<&'static AlarmRule> {
    let kind = match class {
        DetectionClass::Personnel => AlarmKind::Personnel,
        DetectionClass::ForeignObject => AlarmKind::ForeignObject,
        DetectionClass::LargeLump => AlarmKind::LargeLump,
        DetectionClass::LeftShaft | DetectionClass::RightShaft => AlarmKind::Deviation,
        DetectionClass::Smoke => AlarmKind::Smoke,
        DetectionClass::Belt | DetectionClass::CoalFill => return None,
    };
    kind.rule()
}

pub fn rule_by_id(id: u8) -> Option<&'static AlarmRule> {
    ALARM_RULES.iter().find(|rule| rule.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_to_rule_mapping() {
        let expect = [
            (DetectionClass::Personnel, Some(1)),
            (DetectionClass::ForeignObject, Some(2)),
            (DetectionClass::LargeLump, Some(3)),
            (DetectionClass::LeftShaft, Some(5)),
            (DetectionClass::RightShaft, Some(5)),
            (DetectionClass::Smoke, Some(6)),
            (DetectionClass::Belt, None),
            (DetectionClass::CoalFill, None),
        ];
        for (class, id) in expect {
            assert_eq!(rule_for_class(class).map(|r| r.id), id, "{class}");
        }
    }

    #[test]
    fn test_rule_registers_match_register_map() {
        for rule in &ALARM_RULES {
            assert_eq!(rule.register, rule.kind.register());
            assert_eq!(rule_by_id(rule.id), Some(rule));
        }
        assert!(AlarmKind::CoalFill.rule().is_none());
        assert!(rule_by_id(4).is_none());
    }

    #[test]
    fn test_alarm_kind_from_str() {
        assert_eq!("smoke".parse::<AlarmKind>(), Ok(AlarmKind::Smoke));
        assert_eq!(
            "fire".parse::<AlarmKind>(),
            Err(UnknownAlarm("fire".to_string()))
        );
    }
}
