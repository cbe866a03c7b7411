//! Soft PLC: Structured Text on a fixed scan cycle, bridged to Modbus TCP.

pub mod plc;
