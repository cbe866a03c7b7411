//! Modbus bridge: moves data between interpreter memory, the plant and the register table.
//!
//! Constraints:
//! - plant I/O failures are absorbed here (logged, connection dropped, retried next cycle)
//! - a status value that cannot be encoded never holds back the rest of the table
//! - the register table lock is never held across an await
//! - only Input variables are written into memory

use log::{debug, error, warn};

use crate::plc::adapters::driver::connection::PlantConnection;
use crate::plc::adapters::server::SharedRegisterTable;
use crate::plc::core::ast::VarClass;
use crate::plc::core::codec::{self, CodecError};
use crate::plc::core::memory::Memory;
use crate::plc::core::register_map::Signal;
use crate::plc::core::value::Value;

const STATUS_SIGNALS: [(Signal, VarClass); 6] = [
    (Signal::RoomTemperature, VarClass::Input),
    (Signal::RoomHumidity, VarClass::Input),
    (Signal::FanSpeed, VarClass::Output),
    (Signal::ChillerOn, VarClass::Output),
    (Signal::SystemStatus, VarClass::Output),
    (Signal::AlarmActive, VarClass::Output),
];

pub struct ModbusBridge {
    table: SharedRegisterTable,
    plant: PlantConnection,
    sensor_words: Option<[u16; 2]>,
    actuator_words: Option<[u16; 2]>,
}

impl ModbusBridge {
    pub fn new(table: SharedRegisterTable, plant: PlantConnection) -> Self {
        Self {
            table,
            plant,
            sensor_words: None,
            actuator_words: None,
        }
    }

    pub fn table(&self) -> &SharedRegisterTable {
        &self.table
    }

    pub fn plant_connected(&self) -> bool {
        self.plant.is_connected()
    }

    /// Copies the command block into `Memory.Input`.
    pub fn pull_commands(&self, memory: &mut Memory) {
        let words: Vec<(Signal, u16)> = {
            let table = self.table.lock();
            Signal::COMMANDS
                .iter()
                .map(|signal| (*signal, table.get(*signal)))
                .collect()
        };

        for (signal, word) in words {
            write_input(memory, signal.memory_name(), codec::decode_value(signal, word));
        }
    }

    /// Reads both sensor registers from the plant. Returns `false` when the plant is unavailable.
    pub async fn read_plant_inputs(&mut self, memory: &mut Memory) -> bool {
        let address = Signal::SensorTemp.address();
        let words = match self.plant.read_holding(address, 2).await {
            Ok(words) => words,
            Err(err) => {
                warn!(
                    "[plc][bridge] plant read failed endpoint={}: {err}",
                    self.plant.endpoint()
                );
                return false;
            }
        };

        let [temp, humidity] = match words.as_slice() {
            [temp, humidity] => [*temp, *humidity],
            other => {
                warn!("[plc][bridge] plant read returned {} words", other.len());
                return false;
            }
        };
        debug!("[plc][bridge] sensors temp={temp} humidity={humidity}");
        self.sensor_words = Some([temp, humidity]);
        for (signal, word) in [(Signal::SensorTemp, temp), (Signal::SensorHumidity, humidity)] {
            write_input(
                memory,
                signal.memory_name(),
                Value::Real(codec::decode(signal, word)),
            );
        }
        true
    }

    /// Writes `[fan speed, chiller]` to the plant actuators.
    pub async fn write_plant_outputs(&mut self, memory: &Memory) -> bool {
        let fan = codec::fan_speed_word(memory.get_in(VarClass::Output, "FanSpeed"));
        let chiller = flag_word(memory.get_in(VarClass::Output, "ChillerOn"));
        let words = [fan, chiller];

        match self
            .plant
            .write_holding(Signal::ActuatorFanSpeed.address(), &words)
            .await
        {
            Ok(()) => {
                self.actuator_words = Some(words);
                true
            }
            Err(err) => {
                warn!(
                    "[plc][bridge] plant write failed endpoint={}: {err}",
                    self.plant.endpoint()
                );
                false
            }
        }
    }

    /// Mirrors status, sensor and actuator words into the register table.
    ///
    /// A status value that does not fit its register is published saturated, raises
    /// `AlarmActive` and is returned; every other word is still published.
    pub fn publish(&self, memory: &mut Memory) -> Vec<CodecError> {
        let mut faults = Vec::new();
        let mut status = Vec::with_capacity(STATUS_SIGNALS.len());
        for (signal, class) in STATUS_SIGNALS {
            let word = match codec::encode(signal, memory.get_in(class, signal.memory_name())) {
                Ok(word) => word,
                Err(err) => {
                    let word = codec::saturated_word(&err);
                    warn!("[plc][bridge] publish saturated word={word}: {err}");
                    faults.push(err);
                    word
                }
            };
            status.push((signal, word));
        }

        if !faults.is_empty() {
            match memory.raise_alarm() {
                Ok(()) => status.push((Signal::AlarmActive, 1)),
                Err(err) => error!("[plc][bridge] cannot raise alarm: {err}"),
            }
        }

        let mut table = self.table.lock();
        for (signal, word) in status {
            table.set(signal, word);
        }
        if let Some([temp, humidity]) = self.sensor_words {
            table.set(Signal::SensorTemp, temp);
            table.set(Signal::SensorHumidity, humidity);
        }
        if let Some([fan, chiller]) = self.actuator_words {
            table.set(Signal::ActuatorFanSpeed, fan);
            table.set(Signal::ActuatorChiller, chiller);
        }
        faults
    }
}

fn write_input(memory: &mut Memory, name: &str, value: Value) {
    if let Err(err) = memory.write_input(name, value) {
        warn!("[plc][bridge] skip input {name}: {err}");
    }
}

fn flag_word(value: Option<&Value>) -> u16 {
    let on = match value {
        Some(Value::Bool(flag)) => *flag,
        Some(other) => other.as_f64().is_some_and(|v| v != 0.0),
        None => false,
    };
    u16::from(on)
}
