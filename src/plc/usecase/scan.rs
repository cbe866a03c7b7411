//! Fixed-period scan cycle.
//!
//! One iteration: pull commands → read plant → execute → write plant → publish → pace.
//!
//! Constraints:
//! - the scan task is the only mutator of interpreter memory
//! - an overrun starts the next iteration immediately, without catch-up
//! - each iteration runs as its own task; one that dies is logged and the loop pauses one period
//! - stop aborts the iteration in flight and interrupts pacing

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use uuid::Uuid;

use super::bridge::ModbusBridge;
use crate::plc::adapters::shutdown::{join_within, wait_stop, Joined};
use crate::plc::core::codec::CodecError;
use crate::plc::core::interpreter::{CycleOutcome, Interpreter};
use crate::plc::core::memory::{Memory, MemorySnapshot};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("scan iteration did not complete: {0}")]
    Task(#[from] JoinError),
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanState {
    pub run_id: Uuid,
    pub cycle_count: u64,
    pub last_cycle_duration_ms: f64,
    pub system_enabled: bool,
    pub running: bool,
    pub program_loaded: bool,
    pub overruns: u64,
    pub failed_cycles: u64,
    pub plant_connected: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_fault: Option<String>,
}

impl ScanState {
    fn new(run_id: Uuid, program_loaded: bool) -> Self {
        Self {
            run_id,
            cycle_count: 0,
            last_cycle_duration_ms: 0.0,
            system_enabled: false,
            running: true,
            program_loaded,
            overruns: 0,
            failed_cycles: 0,
            plant_connected: false,
            last_cycle_at: None,
            last_fault: None,
        }
    }
}

/// Everything one scan loop owns.
pub struct ScanContext {
    pub interpreter: Interpreter,
    pub memory: Memory,
    pub bridge: ModbusBridge,
}

impl ScanContext {
    pub fn new(interpreter: Interpreter, memory: Memory, bridge: ModbusBridge) -> Self {
        Self {
            interpreter,
            memory,
            bridge,
        }
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Status values published saturated this cycle.
    pub publish_faults: Vec<CodecError>,
}

impl CycleReport {
    fn fault(&self) -> Option<String> {
        match (&self.outcome.fault, self.publish_faults.last()) {
            (Some(err), _) => Some(err.to_string()),
            (None, Some(err)) => Some(err.to_string()),
            (None, None) => None,
        }
    }
}

/// One full iteration without pacing.
pub async fn run_cycle(ctx: &mut ScanContext) -> CycleReport {
    ctx.bridge.pull_commands(&mut ctx.memory);
    ctx.bridge.read_plant_inputs(&mut ctx.memory).await;

    let outcome = ctx.interpreter.execute_cycle(&mut ctx.memory);

    ctx.bridge.write_plant_outputs(&ctx.memory).await;
    let publish_faults = ctx.bridge.publish(&mut ctx.memory);
    CycleReport {
        outcome,
        publish_faults,
    }
}

struct Completed {
    report: CycleReport,
    plant_connected: bool,
    memory: MemorySnapshot,
}

async fn run_owned(ctx: Arc<AsyncMutex<ScanContext>>) -> Completed {
    let mut ctx = ctx.lock_owned().await;
    let report = run_cycle(&mut ctx).await;
    Completed {
        report,
        plant_connected: ctx.bridge.plant_connected(),
        memory: ctx.memory.snapshot(),
    }
}

pub struct ScanHandle {
    run_id: Uuid,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    state: Arc<Mutex<ScanState>>,
    memory: Arc<Mutex<MemorySnapshot>>,
}

impl ScanHandle {
    /// Latest diagnostics; never waits on the scan task.
    pub fn state(&self) -> ScanState {
        self.state.lock().clone()
    }

    /// Memory as of the end of the last completed cycle.
    pub fn memory(&self) -> MemorySnapshot {
        self.memory.lock().clone()
    }

    /// Requests stop and waits up to one second for the loop to exit, aborting it otherwise.
    pub async fn stop(&mut self) -> bool {
        let _ = self.stop_tx.send(true);
        let stopped = match join_within(&mut self.join, Duration::from_secs(1)).await {
            Joined::Finished(()) => true,
            Joined::Failed(err) => {
                error!("[plc][scan] runId={} loop task failed: {err}", self.run_id);
                false
            }
            Joined::Aborted => {
                warn!("[plc][scan] runId={} loop did not stop within 1s, aborted", self.run_id);
                false
            }
        };
        self.state.lock().running = false;
        info!("[plc][scan] runId={} stopped clean={stopped}", self.run_id);
        stopped
    }
}

pub struct ScanEngine;

impl ScanEngine {
    pub fn start(run_id: Uuid, ctx: ScanContext, period: Duration) -> ScanHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(ScanState::new(
            run_id,
            ctx.interpreter.is_program_loaded(),
        )));
        let memory = Arc::new(Mutex::new(ctx.memory.snapshot()));

        info!(
            "[plc][scan] runId={run_id} start periodMs={} programLoaded={}",
            period.as_millis(),
            ctx.interpreter.is_program_loaded()
        );
        let join = tokio::spawn(scan_loop(
            run_id,
            ctx,
            period,
            stop_rx,
            Arc::clone(&state),
            Arc::clone(&memory),
        ));

        ScanHandle {
            run_id,
            stop_tx,
            join,
            state,
            memory,
        }
    }
}

async fn scan_loop(
    run_id: Uuid,
    ctx: ScanContext,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
    state: Arc<Mutex<ScanState>>,
    memory: Arc<Mutex<MemorySnapshot>>,
) {
    let ctx = Arc::new(AsyncMutex::new(ctx));
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let started = Instant::now();
        let mut cycle = tokio::spawn(run_owned(Arc::clone(&ctx)));
        let result = tokio::select! {
            _ = wait_stop(&mut stop_rx) => {
                cycle.abort();
                break;
            }
            joined = &mut cycle => joined.map_err(CycleError::from),
        };
        let elapsed = started.elapsed();

        let pause = match result {
            Ok(completed) => {
                let overrun = elapsed > period;
                let outcome = &completed.report.outcome;
                {
                    let mut guard = state.lock();
                    guard.cycle_count += 1;
                    guard.last_cycle_duration_ms = elapsed.as_secs_f64() * 1000.0;
                    guard.system_enabled = outcome.system_enabled;
                    guard.plant_connected = completed.plant_connected;
                    guard.last_cycle_at = Some(Utc::now());
                    if overrun {
                        guard.overruns += 1;
                    }
                    if let Some(fault) = completed.report.fault() {
                        guard.last_fault = Some(fault);
                    }
                    debug!(
                        "[plc][scan] runId={run_id} cycle={} durationMs={:.2} enabled={}",
                        guard.cycle_count, guard.last_cycle_duration_ms, outcome.system_enabled
                    );
                }
                *memory.lock() = completed.memory;

                if overrun {
                    warn!(
                        "[plc][scan] runId={run_id} overrun durationMs={} periodMs={}",
                        elapsed.as_millis(),
                        period.as_millis()
                    );
                    None
                } else {
                    Some(started + period)
                }
            }
            Err(err) => {
                {
                    let mut guard = state.lock();
                    guard.failed_cycles += 1;
                    guard.last_fault = Some(err.to_string());
                }
                error!("[plc][scan] runId={run_id} cycle failed: {err}");
                Some(Instant::now() + period)
            }
        };

        if let Some(deadline) = pause {
            tokio::select! {
                _ = wait_stop(&mut stop_rx) => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    state.lock().running = false;
    info!("[plc][scan] runId={run_id} loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::plc::adapters::driver::connection::PlantConnection;
    use crate::plc::adapters::driver::mock::MockDriver;
    use crate::plc::adapters::driver::PlantEndpoint;
    use crate::plc::adapters::server::RegisterTable;
    use crate::plc::core::ast::VarClass;
    use crate::plc::core::builtins::BuiltinRegistry;
    use crate::plc::core::interpreter::EvalError;
    use crate::plc::core::parser::parse;
    use crate::plc::core::register_map::Signal;
    use crate::plc::core::value::Value;

    const PERIOD: Duration = Duration::from_millis(100);

    fn context(driver: &MockDriver) -> ScanContext {
        context_with(driver, Interpreter::new(None))
    }

    fn context_with(driver: &MockDriver, interpreter: Interpreter) -> ScanContext {
        let plant = PlantConnection::new(
            Uuid::new_v4(),
            Arc::new(driver.clone()),
            PlantEndpoint {
                host: "plant".to_string(),
                port: 503,
                unit_id: 1,
            },
            Duration::from_secs(1),
            Duration::ZERO,
        );
        let bridge = ModbusBridge::new(RegisterTable::shared(), plant);
        let memory = interpreter.initial_memory().unwrap();
        ScanContext::new(interpreter, memory, bridge)
    }

    fn output(ctx: &ScanContext, name: &str) -> Option<Value> {
        ctx.memory.get_in(VarClass::Output, name).cloned()
    }

    #[tokio::test]
    async fn supervisory_write_takes_effect_on_the_next_cycle() {
        let driver = MockDriver::new();
        driver.set_registers(Signal::SensorTemp.address(), &[250, 500]);
        let mut ctx = context(&driver);

        run_cycle(&mut ctx).await;
        assert_eq!(output(&ctx, "SystemStatus"), Some(Value::Int(0)));

        // written between cycles: memory untouched until the next iteration pulls it
        ctx.bridge.table().lock().set(Signal::SystemEnable, 1);
        assert!(!ctx.memory.system_enabled());

        let outcome = run_cycle(&mut ctx).await.outcome;
        assert!(outcome.system_enabled);
        assert_eq!(output(&ctx, "SystemStatus"), Some(Value::Int(1)));
        assert_eq!(output(&ctx, "FanSpeed"), Some(Value::Int(60)));
        assert_eq!(driver.registers(Signal::ActuatorFanSpeed.address(), 2), vec![60, 1]);

        let table = ctx.bridge.table().lock();
        assert_eq!(table.get(Signal::SystemStatus), 1);
        assert_eq!(table.get(Signal::RoomTemperature), 250);
    }

    #[tokio::test]
    async fn cycle_completes_without_plant() {
        let driver = MockDriver::new();
        driver.set_fail_connect(true);
        let mut ctx = context(&driver);
        ctx.bridge.table().lock().set(Signal::SystemEnable, 1);

        let report = run_cycle(&mut ctx).await;
        assert!(report.outcome.fault.is_none());
        assert!(report.publish_faults.is_empty());
        // default memory: 20 °C room, idle
        assert_eq!(output(&ctx, "SystemStatus"), Some(Value::Int(2)));
        assert_eq!(ctx.bridge.table().lock().get(Signal::SystemStatus), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_are_paced_to_the_period() {
        let driver = MockDriver::new();
        let mut handle = ScanEngine::start(Uuid::new_v4(), context(&driver), PERIOD);

        tokio::time::sleep(Duration::from_millis(1050)).await;
        let state = handle.state();
        assert!((10..=12).contains(&state.cycle_count), "{state:?}");
        assert_eq!(state.overruns, 0);
        assert!(state.running);
        assert!(state.plant_connected);

        assert!(handle.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn overruns_run_back_to_back() {
        let driver = MockDriver::new();
        // read + write = 300 ms per cycle
        driver.set_latency(Duration::from_millis(150));
        let mut handle = ScanEngine::start(Uuid::new_v4(), context(&driver), PERIOD);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let state = handle.state();
        assert!((3..=4).contains(&state.cycle_count), "{state:?}");
        assert_eq!(state.overruns, state.cycle_count);
        assert!(state.last_cycle_duration_ms >= 299.0);

        assert!(handle.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn unencodable_output_still_publishes_and_alarms() {
        let program = parse(
            r#"
PROGRAM Undershoot
VAR_INPUT
    RoomTemperature : REAL;
    SetpointTemp : REAL := 22.0;
END_VAR
VAR_OUTPUT
    FanSpeed : INT;
    SystemStatus : INT;
    AlarmActive : BOOL;
END_VAR
SystemStatus := 2;
FanSpeed := (RoomTemperature - SetpointTemp) * 20;
END_PROGRAM
"#,
        )
        .unwrap();
        let driver = MockDriver::new();
        driver.set_registers(Signal::SensorTemp.address(), &[200, 500]);
        let ctx = context_with(&driver, Interpreter::new(Some(program)));
        let table = Arc::clone(ctx.bridge.table());
        let mut handle = ScanEngine::start(Uuid::new_v4(), ctx, PERIOD);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let state = handle.state();
        assert!(state.cycle_count >= 9, "{state:?}");
        assert_eq!(state.failed_cycles, 0);
        assert!(state.last_fault.is_some());

        {
            let table = table.lock();
            assert_eq!(table.get(Signal::RoomTemperature), 200);
            assert_eq!(table.get(Signal::RoomHumidity), 500);
            assert_eq!(table.get(Signal::SystemStatus), 2);
            assert_eq!(table.get(Signal::FanSpeed), 0);
            assert_eq!(table.get(Signal::AlarmActive), 1);
        }
        let memory = handle.memory();
        assert!(matches!(memory.outputs.get("FanSpeed"), Some(Value::Int(speed)) if *speed < 0));
        assert_eq!(memory.outputs.get("AlarmActive"), Some(&Value::Bool(true)));

        let before = handle.state().cycle_count;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.state().cycle_count > before);

        assert!(handle.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycles_are_counted_and_the_loop_keeps_going() {
        let program = parse("PROGRAM Tripping Trip(); END_PROGRAM").unwrap();
        let mut builtins = BuiltinRegistry::standard();
        builtins.register(
            "Trip",
            Arc::new(|_: &str, _: &[Value]| -> Result<Option<Value>, EvalError> {
                panic!("builtin tripped")
            }),
        );
        let interpreter = Interpreter::new(Some(program)).with_builtins(builtins);
        let driver = MockDriver::new();
        let mut handle = ScanEngine::start(Uuid::new_v4(), context_with(&driver, interpreter), PERIOD);

        tokio::time::sleep(Duration::from_millis(450)).await;
        let state = handle.state();
        assert_eq!(state.cycle_count, 0);
        // one failure per period, never back to back
        assert!((4..=5).contains(&state.failed_cycles), "{state:?}");
        assert!(state.running);
        assert!(state.last_fault.is_some());

        assert!(handle.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_stalled_cycle() {
        let driver = MockDriver::new();
        driver.set_latency(Duration::from_millis(900));
        let mut handle = ScanEngine::start(Uuid::new_v4(), context(&driver), PERIOD);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        assert!(handle.stop().await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn state_serializes_camel_case() {
        let state = ScanState::new(Uuid::nil(), false);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["cycleCount"], 0);
        assert_eq!(json["programLoaded"], false);
        assert!(json["lastCycleAt"].is_null());
    }
}
