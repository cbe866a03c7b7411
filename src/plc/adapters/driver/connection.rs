//! Plant connection lifecycle for one run.
//!
//! Goals:
//! - Wait the startup delay once, before the very first connection attempt
//! - Reuse the connection across cycles; any failed exchange drops it
//! - At most one connection attempt per use; retry pacing comes from the scan period

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use uuid::Uuid;

use super::{ConnectedClient, DriverError, PlantDriver, PlantEndpoint};

pub struct PlantConnection {
    run_id: Uuid,
    driver: Arc<dyn PlantDriver>,
    endpoint: PlantEndpoint,
    io_timeout: Duration,
    startup_delay: Option<Duration>,
    client: Option<ConnectedClient>,
}

impl PlantConnection {
    pub fn new(
        run_id: Uuid,
        driver: Arc<dyn PlantDriver>,
        endpoint: PlantEndpoint,
        io_timeout: Duration,
        startup_delay: Duration,
    ) -> Self {
        Self {
            run_id,
            driver,
            endpoint,
            io_timeout,
            startup_delay: Some(startup_delay),
            client: None,
        }
    }

    pub fn endpoint(&self) -> &PlantEndpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn invalidate(&mut self, reason: &str) {
        if self.client.take().is_some() {
            warn!(
                "[plc][conn] runId={} invalidate endpoint={} reason={}",
                self.run_id, self.endpoint, reason
            );
        }
    }

    pub async fn ensure_connected(&mut self) -> Result<(), DriverError> {
        if self.client.is_some() {
            return Ok(());
        }

        if let Some(delay) = self.startup_delay.take() {
            if !delay.is_zero() {
                info!(
                    "[plc][conn] runId={} startup delay {}ms before first connect",
                    self.run_id,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
        }

        info!("[plc][conn] runId={} connect endpoint={}", self.run_id, self.endpoint);
        let connect = self.driver.connect(&self.endpoint);
        let client = match tokio::time::timeout(self.io_timeout, connect).await {
            Ok(v) => v,
            Err(_) => Err(DriverError::Timeout),
        }?;

        info!("[plc][conn] runId={} connected endpoint={}", self.run_id, self.endpoint);
        self.client = Some(client);
        Ok(())
    }

    pub async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, DriverError> {
        self.ensure_connected().await?;
        let Some(client) = self.client.as_mut() else {
            return Err(DriverError::Comm {
                message: "not connected".to_string(),
            });
        };

        let read = self.driver.read_holding(client, address, count);
        let result = match tokio::time::timeout(self.io_timeout, read).await {
            Ok(v) => v,
            Err(_) => Err(DriverError::Timeout),
        };
        if let Err(err) = &result {
            self.invalidate(&format!("read failed: {err}"));
        }
        result
    }

    pub async fn write_holding(&mut self, address: u16, words: &[u16]) -> Result<(), DriverError> {
        self.ensure_connected().await?;
        let Some(client) = self.client.as_mut() else {
            return Err(DriverError::Comm {
                message: "not connected".to_string(),
            });
        };

        let write = self.driver.write_holding(client, address, words);
        let result = match tokio::time::timeout(self.io_timeout, write).await {
            Ok(v) => v,
            Err(_) => Err(DriverError::Timeout),
        };
        if let Err(err) = &result {
            self.invalidate(&format!("write failed: {err}"));
        }
        result
    }
}
