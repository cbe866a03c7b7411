//! Runtime wiring: register server + plant connection + interpreter + scan engine.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::bridge::ModbusBridge;
use super::scan::{ScanContext, ScanEngine, ScanHandle, ScanState};
use crate::plc::adapters::driver::connection::PlantConnection;
use crate::plc::adapters::driver::modbus_tcp::ModbusTcpDriver;
use crate::plc::adapters::driver::{PlantDriver, PlantEndpoint};
use crate::plc::adapters::server::{RegisterServer, RegisterTable, SharedRegisterTable};
use crate::plc::adapters::shutdown::{join_within, Joined};
use crate::plc::core::ast::Program;
use crate::plc::core::config::{ConfigError, PlcConfigV1};
use crate::plc::core::interpreter::Interpreter;
use crate::plc::core::memory::{MemoryError, MemorySnapshot};

#[derive(Debug, Error)]
pub enum PlcError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("bind register server on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("initialize memory: {0}")]
    Memory(#[from] MemoryError),
}

pub struct PlcRuntime;

impl PlcRuntime {
    /// Starts against the real plant over Modbus TCP.
    pub async fn start(
        config: PlcConfigV1,
        program: Option<Program>,
    ) -> Result<RunningPlc, PlcError> {
        Self::start_with_driver(config, program, Arc::new(ModbusTcpDriver::new())).await
    }

    pub async fn start_with_driver(
        config: PlcConfigV1,
        program: Option<Program>,
        driver: Arc<dyn PlantDriver>,
    ) -> Result<RunningPlc, PlcError> {
        config.validate()?;
        let run_id = Uuid::new_v4();

        let interpreter = Interpreter::new(program);
        let memory = interpreter.initial_memory()?;
        if !interpreter.is_program_loaded() {
            warn!("[plc][runtime] runId={run_id} no program loaded, running default controller");
        }

        let table = RegisterTable::shared();
        let server = RegisterServer::bind(&config.server.bind_addr, Arc::clone(&table))
            .await
            .map_err(|source| PlcError::Bind {
                addr: config.server.bind_addr.clone(),
                source,
            })?;
        let server_addr = server.local_addr();
        let (server_stop_tx, server_stop_rx) = watch::channel(false);
        let server_join = tokio::spawn(server.run(server_stop_rx));

        let plant = PlantConnection::new(
            run_id,
            driver,
            PlantEndpoint {
                host: config.plant.host.clone(),
                port: config.plant.port,
                unit_id: config.plant.unit_id,
            },
            config.plant.io_timeout(),
            config.plant.startup_delay(),
        );
        let bridge = ModbusBridge::new(Arc::clone(&table), plant);
        let ctx = ScanContext::new(interpreter, memory, bridge);
        let scan = ScanEngine::start(run_id, ctx, config.scan.period());

        info!(
            "[plc][runtime] runId={run_id} started server={server_addr} plant={}:{}",
            config.plant.host, config.plant.port
        );
        Ok(RunningPlc {
            run_id,
            server_addr,
            table,
            scan,
            server_stop_tx,
            server_join,
        })
    }
}

pub struct RunningPlc {
    run_id: Uuid,
    server_addr: SocketAddr,
    table: SharedRegisterTable,
    scan: ScanHandle,
    server_stop_tx: watch::Sender<bool>,
    server_join: JoinHandle<io::Result<()>>,
}

impl RunningPlc {
    /// Actual bound address (useful with port 0).
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn table(&self) -> &SharedRegisterTable {
        &self.table
    }

    pub fn state(&self) -> ScanState {
        self.scan.state()
    }

    pub fn memory(&self) -> MemorySnapshot {
        self.scan.memory()
    }

    /// JSON diagnostics: scan state plus the latest memory image.
    pub fn diagnostics(&self) -> serde_json::Value {
        serde_json::json!({
            "scan": self.scan.state(),
            "memory": self.scan.memory(),
        })
    }

    /// Stops the scan loop first, then the register server and its open sessions. The plant
    /// connection is dropped together with the scan task.
    pub async fn shutdown(mut self) -> ScanState {
        let run_id = self.run_id;
        let stopped = self.scan.stop().await;
        let final_state = self.scan.state();

        let _ = self.server_stop_tx.send(true);
        match join_within(&mut self.server_join, Duration::from_secs(1)).await {
            Joined::Finished(Ok(())) => {}
            Joined::Finished(Err(err)) => warn!("[plc][runtime] runId={run_id} server error: {err}"),
            Joined::Failed(err) => warn!("[plc][runtime] runId={run_id} server task failed: {err}"),
            Joined::Aborted => {
                warn!("[plc][runtime] runId={run_id} server did not stop within 1s, aborted")
            }
        }

        info!("[plc][runtime] runId={run_id} shutdown scanStopped={stopped}");
        final_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::plc::adapters::driver::mock::MockDriver;
    use crate::plc::core::config::{PlantConfig, ServerConfig};
    use crate::plc::core::register_map::Signal;

    fn test_config() -> PlcConfigV1 {
        PlcConfigV1 {
            server: ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                unit_id: 1,
            },
            plant: PlantConfig {
                host: "plant".to_string(),
                startup_delay_ms: 0,
                ..PlantConfig::default()
            },
            ..PlcConfigV1::default()
        }
    }

    #[tokio::test]
    async fn start_and_shutdown_with_default_controller() {
        let driver = MockDriver::new();
        driver.set_registers(Signal::SensorTemp.address(), &[300, 500]);
        let plc = PlcRuntime::start_with_driver(test_config(), None, Arc::new(driver.clone()))
            .await
            .unwrap();
        assert_ne!(plc.server_addr().port(), 0);

        plc.table().lock().set(Signal::SystemEnable, 1);
        let mut status = 0;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            status = plc.table().lock().get(Signal::SystemStatus);
            if status == 1 {
                break;
            }
        }
        assert_eq!(status, 1);
        assert_eq!(driver.registers(Signal::ActuatorFanSpeed.address(), 2), vec![100, 1]);

        let diagnostics = plc.diagnostics();
        assert_eq!(diagnostics["scan"]["programLoaded"], false);

        let state = plc.shutdown().await;
        assert!(!state.running);
        assert!(state.cycle_count >= 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_binding() {
        let mut config = test_config();
        config.scan.period_ms = 0;
        let err = PlcRuntime::start_with_driver(config, None, Arc::new(MockDriver::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::Config(_)));
    }

    #[tokio::test]
    async fn unusable_bind_address_is_reported() {
        let mut config = test_config();
        config.server.bind_addr = "not-an-address".to_string();
        let err = PlcRuntime::start_with_driver(config, None, Arc::new(MockDriver::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PlcError::Bind { .. }));
    }
}
