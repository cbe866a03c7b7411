//! Mock plant driver for offline runs and tests.
//!
//! Holds a 400-word register image in memory. Behaviour switches:
//! - `fail_connect` / `fail_io` → `DriverError::Comm`
//! - `latency` → every read/write sleeps first (tokio time, so paused-time tests stay exact)

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::duplex;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::Slave;

use super::{
    ConnectFuture, ConnectedClient, DriverError, PlantDriver, PlantEndpoint, ReadFuture,
    WriteFuture,
};
use crate::plc::core::register_map::TABLE_SIZE;

#[derive(Default)]
struct MockState {
    fail_connect: AtomicBool,
    fail_io: AtomicBool,
    connects: AtomicUsize,
    latency: Mutex<Duration>,
    registers: Mutex<Vec<u16>>,
}

/// Cloning shares the same plant image.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        let state = MockState {
            registers: Mutex::new(vec![0; usize::from(TABLE_SIZE)]),
            ..MockState::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn set_registers(&self, address: u16, words: &[u16]) {
        let mut registers = self.state.registers.lock();
        for (offset, word) in words.iter().enumerate() {
            if let Some(slot) = registers.get_mut(usize::from(address) + offset) {
                *slot = *word;
            }
        }
    }

    pub fn registers(&self, address: u16, count: u16) -> Vec<u16> {
        let registers = self.state.registers.lock();
        let start = usize::from(address);
        registers
            .get(start..start + usize::from(count))
            .map(<[u16]>::to_vec)
            .unwrap_or_default()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_io(&self, fail: bool) {
        self.state.fail_io.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    async fn simulate_io(&self) -> Result<(), DriverError> {
        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.state.fail_io.load(Ordering::SeqCst) {
            return Err(DriverError::Comm {
                message: "mock comm error".to_string(),
            });
        }
        Ok(())
    }
}

impl PlantDriver for MockDriver {
    fn connect<'a>(&'a self, endpoint: &'a PlantEndpoint) -> ConnectFuture<'a> {
        Box::pin(async move {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(DriverError::Comm {
                    message: format!("mock connect refused: {endpoint}"),
                });
            }

            let (stream, _peer) = duplex(64);
            let ctx: ConnectedClient = tcp::attach_slave(stream, Slave(endpoint.unit_id));
            Ok(ctx)
        })
    }

    fn read_holding<'a>(
        &'a self,
        _client: &'a mut ConnectedClient,
        address: u16,
        count: u16,
    ) -> ReadFuture<'a> {
        Box::pin(async move {
            self.simulate_io().await?;
            let words = self.registers(address, count);
            if words.len() != usize::from(count) {
                return Err(DriverError::Comm {
                    message: "modbus exception: illegal data address".to_string(),
                });
            }
            Ok(words)
        })
    }

    fn write_holding<'a>(
        &'a self,
        _client: &'a mut ConnectedClient,
        address: u16,
        words: &'a [u16],
    ) -> WriteFuture<'a> {
        Box::pin(async move {
            self.simulate_io().await?;
            self.set_registers(address, words);
            Ok(())
        })
    }
}
