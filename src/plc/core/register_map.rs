//! Fixed holding-register map shared by both Modbus roles.
//!
//! Addresses are zero-based (protocol address 40001 == offset 0). Each block owns 100 words.

use std::ops::Range;

use serde::Serialize;

pub const BLOCK_SIZE: u16 = 100;
/// Commands + Status + Sensors + Actuators.
pub const TABLE_SIZE: u16 = BLOCK_SIZE * 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RegisterBlock {
    Commands,
    Status,
    Sensors,
    Actuators,
}

impl RegisterBlock {
    pub const ALL: [RegisterBlock; 4] = [
        RegisterBlock::Commands,
        RegisterBlock::Status,
        RegisterBlock::Sensors,
        RegisterBlock::Actuators,
    ];

    pub fn base(self) -> u16 {
        match self {
            RegisterBlock::Commands => 0,
            RegisterBlock::Status => BLOCK_SIZE,
            RegisterBlock::Sensors => BLOCK_SIZE * 2,
            RegisterBlock::Actuators => BLOCK_SIZE * 3,
        }
    }

    pub fn range(self) -> Range<u16> {
        self.base()..self.base() + BLOCK_SIZE
    }

    pub fn of(address: u16) -> Option<RegisterBlock> {
        Self::ALL
            .into_iter()
            .find(|block| block.range().contains(&address))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    SystemEnable,
    SetpointTemp,
    SetpointHumidity,
    TempDeadband,
    HumidityDeadband,
    RoomTemperature,
    RoomHumidity,
    FanSpeed,
    ChillerOn,
    SystemStatus,
    AlarmActive,
    SensorTemp,
    SensorHumidity,
    ActuatorFanSpeed,
    ActuatorChiller,
}

impl Signal {
    pub const ALL: [Signal; 15] = [
        Signal::SystemEnable,
        Signal::SetpointTemp,
        Signal::SetpointHumidity,
        Signal::TempDeadband,
        Signal::HumidityDeadband,
        Signal::RoomTemperature,
        Signal::RoomHumidity,
        Signal::FanSpeed,
        Signal::ChillerOn,
        Signal::SystemStatus,
        Signal::AlarmActive,
        Signal::SensorTemp,
        Signal::SensorHumidity,
        Signal::ActuatorFanSpeed,
        Signal::ActuatorChiller,
    ];

    pub const COMMANDS: [Signal; 5] = [
        Signal::SystemEnable,
        Signal::SetpointTemp,
        Signal::SetpointHumidity,
        Signal::TempDeadband,
        Signal::HumidityDeadband,
    ];

    pub fn address(self) -> u16 {
        match self {
            Signal::SystemEnable => 0,
            Signal::SetpointTemp => 1,
            Signal::SetpointHumidity => 2,
            Signal::TempDeadband => 3,
            Signal::HumidityDeadband => 4,
            Signal::RoomTemperature => 100,
            Signal::RoomHumidity => 101,
            Signal::FanSpeed => 102,
            Signal::ChillerOn => 103,
            Signal::SystemStatus => 104,
            Signal::AlarmActive => 105,
            Signal::SensorTemp => 200,
            Signal::SensorHumidity => 201,
            Signal::ActuatorFanSpeed => 300,
            Signal::ActuatorChiller => 301,
        }
    }

    /// Fixed-point factor between engineering value and register word.
    pub fn scale(self) -> f64 {
        match self {
            Signal::SetpointTemp
            | Signal::SetpointHumidity
            | Signal::TempDeadband
            | Signal::HumidityDeadband
            | Signal::RoomTemperature
            | Signal::RoomHumidity
            | Signal::SensorTemp
            | Signal::SensorHumidity => 10.0,
            _ => 1.0,
        }
    }

    pub fn block(self) -> RegisterBlock {
        match RegisterBlock::of(self.address()) {
            Some(block) => block,
            None => RegisterBlock::Commands,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::SystemEnable => "SystemEnable",
            Signal::SetpointTemp => "SetpointTemp",
            Signal::SetpointHumidity => "SetpointHumidity",
            Signal::TempDeadband => "TempDeadband",
            Signal::HumidityDeadband => "HumidityDeadband",
            Signal::RoomTemperature => "RoomTemperature",
            Signal::RoomHumidity => "RoomHumidity",
            Signal::FanSpeed => "FanSpeed",
            Signal::ChillerOn => "ChillerOn",
            Signal::SystemStatus => "SystemStatus",
            Signal::AlarmActive => "AlarmActive",
            Signal::SensorTemp => "SensorTemp",
            Signal::SensorHumidity => "SensorHumidity",
            Signal::ActuatorFanSpeed => "ActuatorFanSpeed",
            Signal::ActuatorChiller => "ActuatorChiller",
        }
    }

    /// Memory variable fed by (or feeding) this register.
    pub fn memory_name(self) -> &'static str {
        match self {
            Signal::SensorTemp => "RoomTemperature",
            Signal::SensorHumidity => "RoomHumidity",
            Signal::ActuatorFanSpeed => "FanSpeed",
            Signal::ActuatorChiller => "ChillerOn",
            other => other.name(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalInfo {
    pub name: &'static str,
    pub address: u16,
    /// 1-based holding register number (4xxxx notation).
    pub register: u32,
    pub scale: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub block: RegisterBlock,
    pub start: u16,
    pub end: u16,
    pub signals: Vec<SignalInfo>,
}

pub fn register_map_info() -> Vec<BlockInfo> {
    RegisterBlock::ALL
        .into_iter()
        .map(|block| {
            let range = block.range();
            BlockInfo {
                block,
                start: range.start,
                end: range.end - 1,
                signals: Signal::ALL
                    .into_iter()
                    .filter(|signal| signal.block() == block)
                    .map(|signal| SignalInfo {
                        name: signal.name(),
                        address: signal.address(),
                        register: 40001 + u32::from(signal.address()),
                        scale: signal.scale(),
                    })
                    .collect(),
            }
        })
        .collect()
}
