//! Modbus TCP driver toward the plant.
//!
//! Holding registers only (FC3 read, FC16 write); timeouts and reconnects belong to the connection.

use super::{
    ConnectFuture, ConnectedClient, DriverError, PlantDriver, PlantEndpoint, ReadFuture,
    WriteFuture,
};

use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

#[derive(Clone, Debug, Default)]
pub struct ModbusTcpDriver;

impl ModbusTcpDriver {
    pub fn new() -> Self {
        Self
    }
}

impl PlantDriver for ModbusTcpDriver {
    fn connect<'a>(&'a self, endpoint: &'a PlantEndpoint) -> ConnectFuture<'a> {
        Box::pin(async move {
            // Host names (e.g. a compose service) go through the resolver.
            let socket_addr = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
                .await
                .map_err(|e| DriverError::Comm {
                    message: format!("resolve {}: {e}", endpoint.host),
                })?
                .next()
                .ok_or_else(|| DriverError::Comm {
                    message: format!("no address for {}", endpoint.host),
                })?;

            let slave = Slave(endpoint.unit_id);
            let ctx = tcp::connect_slave(socket_addr, slave)
                .await
                .map_err(|e| DriverError::Comm {
                    message: e.to_string(),
                })?;

            Ok(ctx)
        })
    }

    fn read_holding<'a>(
        &'a self,
        client: &'a mut ConnectedClient,
        address: u16,
        count: u16,
    ) -> ReadFuture<'a> {
        Box::pin(async move {
            let data = client
                .read_holding_registers(address, count)
                .await
                .map_err(|e| DriverError::Comm {
                    message: e.to_string(),
                })?
                .map_err(|e| DriverError::Comm {
                    message: format!("modbus exception: {e}"),
                })?;
            if data.len() != usize::from(count) {
                return Err(DriverError::Comm {
                    message: format!("short read: expected {count} got {}", data.len()),
                });
            }
            Ok(data)
        })
    }

    fn write_holding<'a>(
        &'a self,
        client: &'a mut ConnectedClient,
        address: u16,
        words: &'a [u16],
    ) -> WriteFuture<'a> {
        Box::pin(async move {
            client
                .write_multiple_registers(address, words)
                .await
                .map_err(|e| DriverError::Comm {
                    message: e.to_string(),
                })?
                .map_err(|e| DriverError::Comm {
                    message: format!("modbus exception: {e}"),
                })?;
            Ok(())
        })
    }
}
