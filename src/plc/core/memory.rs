//! PLC memory: three variable classes holding tagged values.
//!
//! Invariants:
//! - A name belongs to exactly one class for the lifetime of a run.
//! - Reads resolve Input → Output → Internal, first match wins.
//! - Declared variables keep their declared type; writes are coerced into it.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use super::ast::{DataType, Program, VarClass};
use super::interpreter::EvalError;
use super::value::Value;

pub const SYSTEM_ENABLE: &str = "SystemEnable";
pub const ALARM_ACTIVE: &str = "AlarmActive";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MemoryError {
    #[error("variable '{name}' belongs to {existing:?}, cannot be written as {requested:?}")]
    ClassConflict {
        name: String,
        existing: VarClass,
        requested: VarClass,
    },

    #[error("variable '{name}': {source}")]
    Coerce { name: String, source: EvalError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    class: VarClass,
    /// `None` for names created implicitly (declare-on-assign, bridge inputs).
    declared_type: Option<DataType>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub inputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    pub internal: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default)]
pub struct Memory {
    inputs: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    internal: BTreeMap<String, Value>,
    slots: HashMap<String, Slot>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds memory from program declarations; initial values are coerced to the declared type.
    pub fn from_program(program: &Program) -> Result<Self, MemoryError> {
        let mut memory = Memory::new();
        for variable in program.variables.values() {
            let value = match &variable.initial_value {
                Some(initial) => initial.clone().coerce_to(variable.data_type).map_err(|source| {
                    MemoryError::Coerce {
                        name: variable.name.clone(),
                        source,
                    }
                })?,
                None => Value::default_for(variable.data_type),
            };
            memory.declare(&variable.name, variable.class, variable.data_type, value);
        }

        info!(
            "[plc][memory] initialized inputs={} outputs={} internal={}",
            memory.inputs.len(),
            memory.outputs.len(),
            memory.internal.len()
        );
        Ok(memory)
    }

    /// Built-in HVAC memory used when no program is loaded.
    pub fn hvac_defaults() -> Self {
        let mut memory = Memory::new();
        for (name, data_type, value) in [
            (SYSTEM_ENABLE, DataType::Bool, Value::Bool(false)),
            ("RoomTemperature", DataType::Real, Value::Real(20.0)),
            ("RoomHumidity", DataType::Real, Value::Real(50.0)),
            ("SetpointTemp", DataType::Real, Value::Real(22.0)),
            ("SetpointHumidity", DataType::Real, Value::Real(45.0)),
            ("TempDeadband", DataType::Real, Value::Real(1.0)),
            ("HumidityDeadband", DataType::Real, Value::Real(5.0)),
        ] {
            memory.declare(name, VarClass::Input, data_type, value);
        }
        for (name, data_type, value) in [
            ("FanSpeed", DataType::Int, Value::Int(0)),
            ("ChillerOn", DataType::Bool, Value::Bool(false)),
            ("SystemStatus", DataType::Int, Value::Int(0)),
            (ALARM_ACTIVE, DataType::Bool, Value::Bool(false)),
        ] {
            memory.declare(name, VarClass::Output, data_type, value);
        }
        for (name, data_type, value) in [
            ("TempError", DataType::Real, Value::Real(0.0)),
            ("HumidityError", DataType::Real, Value::Real(0.0)),
            ("CoolingRequired", DataType::Bool, Value::Bool(false)),
            ("DehumidRequired", DataType::Bool, Value::Bool(false)),
        ] {
            memory.declare(name, VarClass::Internal, data_type, value);
        }

        info!("[plc][memory] initialized default HVAC memory");
        memory
    }

    fn declare(&mut self, name: &str, class: VarClass, data_type: DataType, value: Value) {
        self.slots.insert(
            name.to_string(),
            Slot {
                class,
                declared_type: Some(data_type),
            },
        );
        self.area_mut(class).insert(name.to_string(), value);
    }

    fn area(&self, class: VarClass) -> &BTreeMap<String, Value> {
        match class {
            VarClass::Input => &self.inputs,
            VarClass::Output => &self.outputs,
            VarClass::Internal => &self.internal,
        }
    }

    fn area_mut(&mut self, class: VarClass) -> &mut BTreeMap<String, Value> {
        match class {
            VarClass::Input => &mut self.inputs,
            VarClass::Output => &mut self.outputs,
            VarClass::Internal => &mut self.internal,
        }
    }

    pub fn class_of(&self, name: &str) -> Option<VarClass> {
        self.slots.get(name).map(|slot| slot.class)
    }

    pub fn declared_type(&self, name: &str) -> Option<DataType> {
        self.slots.get(name).and_then(|slot| slot.declared_type)
    }

    /// Input → Output → Internal lookup.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inputs
            .get(name)
            .or_else(|| self.outputs.get(name))
            .or_else(|| self.internal.get(name))
    }

    pub fn get_in(&self, class: VarClass, name: &str) -> Option<&Value> {
        self.area(class).get(name)
    }

    pub fn inputs(&self) -> &BTreeMap<String, Value> {
        &self.inputs
    }

    /// Writes `value` as `class`. Unknown names are created in that class; names owned by a
    /// different class are rejected.
    pub fn write(&mut self, class: VarClass, name: &str, value: Value) -> Result<(), MemoryError> {
        let slot = match self.slots.get(name) {
            Some(slot) => *slot,
            None => {
                debug!("[plc][memory] create {class:?} variable name={name}");
                let slot = Slot {
                    class,
                    declared_type: None,
                };
                self.slots.insert(name.to_string(), slot);
                slot
            }
        };

        if slot.class != class {
            return Err(MemoryError::ClassConflict {
                name: name.to_string(),
                existing: slot.class,
                requested: class,
            });
        }

        let value = match slot.declared_type {
            Some(data_type) => value
                .coerce_to(data_type)
                .map_err(|source| MemoryError::Coerce {
                    name: name.to_string(),
                    source,
                })?,
            None => value,
        };
        self.area_mut(class).insert(name.to_string(), value);
        Ok(())
    }

    pub fn write_input(&mut self, name: &str, value: Value) -> Result<(), MemoryError> {
        self.write(VarClass::Input, name, value)
    }

    pub fn write_output(&mut self, name: &str, value: Value) -> Result<(), MemoryError> {
        self.write(VarClass::Output, name, value)
    }

    pub fn write_internal(&mut self, name: &str, value: Value) -> Result<(), MemoryError> {
        self.write(VarClass::Internal, name, value)
    }

    /// `Input["SystemEnable"]`; absent or non-bool reads as disabled.
    pub fn system_enabled(&self) -> bool {
        self.get_in(VarClass::Input, SYSTEM_ENABLE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn raise_alarm(&mut self) -> Result<(), MemoryError> {
        self.write_output(ALARM_ACTIVE, Value::Bool(true))
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            internal: self.internal.clone(),
        }
    }
}
