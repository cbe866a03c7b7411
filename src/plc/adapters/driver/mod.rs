//! Plant-side Modbus drivers (client role).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub mod connection;
pub mod mock;
pub mod modbus_tcp;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("timeout")]
    Timeout,

    #[error("comm error: {message}")]
    Comm { message: String },
}

/// Where the plant's register server lives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlantEndpoint {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
}

impl fmt::Display for PlantEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}?unitId={}", self.host, self.port, self.unit_id)
    }
}

/// A connected Modbus client that is reused across cycles until it fails.
pub type ConnectedClient = tokio_modbus::client::Context;

pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ConnectedClient, DriverError>> + Send + 'a>>;

pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u16>, DriverError>> + Send + 'a>>;

pub type WriteFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + 'a>>;

pub trait PlantDriver: Send + Sync {
    fn connect<'a>(&'a self, endpoint: &'a PlantEndpoint) -> ConnectFuture<'a>;

    fn read_holding<'a>(
        &'a self,
        client: &'a mut ConnectedClient,
        address: u16,
        count: u16,
    ) -> ReadFuture<'a>;

    fn write_holding<'a>(
        &'a self,
        client: &'a mut ConnectedClient,
        address: u16,
        words: &'a [u16],
    ) -> WriteFuture<'a>;
}
