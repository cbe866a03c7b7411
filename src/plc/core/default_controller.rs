//! Built-in deadband controller, used whenever no ST program is loaded.

use log::debug;
use serde::Serialize;

use super::interpreter::EvalError;
use super::memory::Memory;
use super::value::Value;

/// Fan speed (percent) per degree of temperature error.
const FAN_GAIN: f64 = 20.0;
const FAN_MIN_COOLING: i64 = 30;
const FAN_MAX: i64 = 100;
const FAN_DEHUMID_ONLY: i64 = 50;
const FAN_IDLE: i64 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(i64)]
pub enum SystemStatus {
    Off = 0,
    Cooling = 1,
    Idle = 2,
}

impl SystemStatus {
    pub fn code(self) -> i64 {
        self as i64
    }
}

fn input_f64(memory: &Memory, name: &str) -> Result<f64, EvalError> {
    let value = memory.get(name).ok_or_else(|| EvalError::UnknownVariable {
        name: name.to_string(),
    })?;
    value.as_f64().ok_or_else(|| EvalError::TypeMismatch {
        op: name.to_string(),
        left: "REAL".to_string(),
        right: value.type_name().to_string(),
    })
}

fn set_output(memory: &mut Memory, name: &str, value: Value) -> Result<(), EvalError> {
    memory
        .write_output(name, value)
        .map_err(|err| EvalError::AssignRejected {
            target: name.to_string(),
            reason: err.to_string(),
        })
}

fn set_internal(memory: &mut Memory, name: &str, value: Value) -> Result<(), EvalError> {
    memory
        .write_internal(name, value)
        .map_err(|err| EvalError::AssignRejected {
            target: name.to_string(),
            reason: err.to_string(),
        })
}

fn apply(memory: &mut Memory, fan_speed: i64, chiller_on: bool, status: SystemStatus) -> Result<(), EvalError> {
    set_output(memory, "FanSpeed", Value::Int(fan_speed))?;
    set_output(memory, "ChillerOn", Value::Bool(chiller_on))?;
    set_output(memory, "SystemStatus", Value::Int(status.code()))
}

pub fn run(memory: &mut Memory, system_enabled: bool) -> Result<(), EvalError> {
    if !system_enabled {
        return apply(memory, 0, false, SystemStatus::Off);
    }

    let temp_error = input_f64(memory, "RoomTemperature")? - input_f64(memory, "SetpointTemp")?;
    let humidity_error =
        input_f64(memory, "RoomHumidity")? - input_f64(memory, "SetpointHumidity")?;
    let cooling_required = temp_error > input_f64(memory, "TempDeadband")?;
    let dehumid_required = humidity_error > input_f64(memory, "HumidityDeadband")?;

    set_internal(memory, "TempError", Value::Real(temp_error))?;
    set_internal(memory, "HumidityError", Value::Real(humidity_error))?;
    set_internal(memory, "CoolingRequired", Value::Bool(cooling_required))?;
    set_internal(memory, "DehumidRequired", Value::Bool(dehumid_required))?;

    debug!(
        "[plc][default] tempError={temp_error:.2} humidityError={humidity_error:.2} cooling={cooling_required} dehumid={dehumid_required}"
    );

    if cooling_required || dehumid_required {
        let fan_speed = if cooling_required {
            ((temp_error * FAN_GAIN).round() as i64).clamp(FAN_MIN_COOLING, FAN_MAX)
        } else {
            FAN_DEHUMID_ONLY
        };
        apply(memory, fan_speed, true, SystemStatus::Cooling)
    } else {
        apply(memory, FAN_IDLE, false, SystemStatus::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::core::ast::VarClass;
    use crate::plc::core::memory::SYSTEM_ENABLE;

    fn memory_with(inputs: &[(&str, Value)]) -> Memory {
        let mut memory = Memory::hvac_defaults();
        for (name, value) in inputs {
            memory.write_input(name, value.clone()).unwrap();
        }
        memory
    }

    fn outputs(memory: &Memory) -> (Value, Value, Value) {
        let get = |name| memory.get_in(VarClass::Output, name).cloned().unwrap();
        (get("FanSpeed"), get("ChillerOn"), get("SystemStatus"))
    }

    #[test]
    fn disabled_system_is_off_regardless_of_conditions() {
        for temperature in [10.0, 22.0, 40.0] {
            let mut memory = memory_with(&[
                (SYSTEM_ENABLE, Value::Bool(false)),
                ("RoomTemperature", Value::Real(temperature)),
                ("RoomHumidity", Value::Real(95.0)),
            ]);
            memory.write_output("FanSpeed", Value::Int(77)).unwrap();
            run(&mut memory, false).unwrap();
            assert_eq!(
                outputs(&memory),
                (Value::Int(0), Value::Bool(false), Value::Int(0))
            );
        }
    }

    #[test]
    fn cooling_scales_fan_with_temperature_error() {
        let mut memory = memory_with(&[
            (SYSTEM_ENABLE, Value::Bool(true)),
            ("RoomTemperature", Value::Real(25.0)),
            ("SetpointTemp", Value::Real(22.0)),
            ("TempDeadband", Value::Real(1.0)),
            ("RoomHumidity", Value::Real(50.0)),
            ("SetpointHumidity", Value::Real(45.0)),
            ("HumidityDeadband", Value::Real(5.0)),
        ]);
        run(&mut memory, true).unwrap();
        assert_eq!(
            outputs(&memory),
            (Value::Int(60), Value::Bool(true), Value::Int(1))
        );
        assert_eq!(
            memory.get_in(VarClass::Internal, "TempError"),
            Some(&Value::Real(3.0))
        );
        assert_eq!(
            memory.get_in(VarClass::Internal, "CoolingRequired"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn fan_speed_is_clamped_into_cooling_band() {
        let mut memory = memory_with(&[("RoomTemperature", Value::Real(23.2))]);
        run(&mut memory, true).unwrap();
        assert_eq!(outputs(&memory).0, Value::Int(30));

        let mut memory = memory_with(&[("RoomTemperature", Value::Real(35.0))]);
        run(&mut memory, true).unwrap();
        assert_eq!(outputs(&memory).0, Value::Int(100));
    }

    #[test]
    fn dehumidification_only_runs_fan_at_half() {
        let mut memory = memory_with(&[
            ("RoomTemperature", Value::Real(22.0)),
            ("RoomHumidity", Value::Real(60.0)),
        ]);
        run(&mut memory, true).unwrap();
        assert_eq!(
            outputs(&memory),
            (Value::Int(50), Value::Bool(true), Value::Int(1))
        );
    }

    #[test]
    fn within_deadbands_is_idle() {
        let mut memory = memory_with(&[
            ("RoomTemperature", Value::Real(22.5)),
            ("RoomHumidity", Value::Real(47.0)),
        ]);
        run(&mut memory, true).unwrap();
        assert_eq!(
            outputs(&memory),
            (Value::Int(20), Value::Bool(false), Value::Int(2))
        );
    }

    #[test]
    fn missing_input_is_an_error() {
        let mut memory = Memory::new();
        assert_eq!(
            run(&mut memory, true),
            Err(EvalError::UnknownVariable {
                name: "RoomTemperature".to_string()
            })
        );
    }
}
