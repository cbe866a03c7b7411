//! Adapter layer: Modbus I/O and file access.

pub mod driver;
pub mod server;
pub mod shutdown;
pub mod storage;
