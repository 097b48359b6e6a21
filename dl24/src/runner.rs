//! Automated test execution
//!
//! [`TestRunner`] drives one load program against the device: exactly one
//! worker task per runner, a pause gate the worker blocks on, a
//! cancellation flag re-checked after every gate wake, and callbacks that
//! can never kill the worker. Whatever path a run takes out — completion,
//! cutoff, timeout, error, or an external stop — finalization closes the
//! recorder session and commands the load off.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use dl24_core::DeviceStatus;
use dl24_types::{ProfileKind, Reading, SessionMeta, Step, TestProfile};

use crate::device::Device;
use crate::recorder::{Recorder, SessionId};

/// Time between samples while running
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded wait for the worker to exit on stop
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// The device needs a moment between consecutive settings writes
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Test execution states
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TestState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Completed,
    Error,
    VoltageCutoff,
    Timeout,
}

impl TestState {
    /// A run is in progress (a worker exists)
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Paused)
    }

    /// A run has ended; only an external reset leaves this state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::VoltageCutoff | Self::Timeout
        )
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Stopping => "STOPPING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::VoltageCutoff => "VOLTAGE_CUTOFF",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// Progress snapshot pushed to the host on every worker iteration
#[derive(Debug, Clone, PartialEq)]
pub struct TestProgress {
    pub state: TestState,
    pub elapsed_seconds: u64,
    pub current_step: u32,
    pub total_steps: u32,
    pub current_cycle: u32,
    pub total_cycles: u32,
    pub message: String,
}

impl Default for TestProgress {
    fn default() -> Self {
        Self {
            state: TestState::Idle,
            elapsed_seconds: 0,
            current_step: 0,
            total_steps: 1,
            current_cycle: 0,
            total_cycles: 1,
            message: String::new(),
        }
    }
}

/// Progress callback, invoked from the worker task
pub type ProgressCallback = Arc<dyn Fn(&TestProgress) + Send + Sync>;

/// Completion callback: session id and the state at finalization time
pub type CompleteCallback = Arc<dyn Fn(SessionId, TestState) + Send + Sync>;

/// Executes load programs against the device
pub struct TestRunner {
    device: Device,
    recorder: Arc<dyn Recorder>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sample_interval: Duration,
}

struct Shared {
    state: RwLock<TestState>,
    progress: RwLock<TestProgress>,
    cancel: AtomicBool,
    gate: watch::Sender<bool>,
    progress_cb: RwLock<Option<ProgressCallback>>,
    complete_cb: RwLock<Option<CompleteCallback>>,
}

impl Shared {
    fn state(&self) -> TestState {
        *self.state.read()
    }

    fn set_state(&self, state: TestState) {
        debug!(%state, "Runner state");
        *self.state.write() = state;
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Block until the pause gate is open; stop forces it open so a paused
    /// worker can observe cancellation
    async fn wait_gate(&self) {
        let mut rx = self.gate.subscribe();
        while !*rx.borrow_and_update() && !self.cancelled() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Patch the progress, stamp the current state, and push the snapshot
    /// to the host. A panicking callback is contained here.
    fn update_progress(&self, patch: impl FnOnce(&mut TestProgress)) {
        let snapshot = {
            let mut progress = self.progress.write();
            patch(&mut progress);
            progress.state = self.state();
            progress.clone()
        };

        let callback = self.progress_cb.read().clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(&snapshot))).is_err() {
                warn!("Progress callback panicked");
            }
        }
    }
}

impl TestRunner {
    pub fn new(device: Device, recorder: Arc<dyn Recorder>) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            device,
            recorder,
            shared: Arc::new(Shared {
                state: RwLock::new(TestState::Idle),
                progress: RwLock::new(TestProgress::default()),
                cancel: AtomicBool::new(false),
                gate,
                progress_cb: RwLock::new(None),
                complete_cb: RwLock::new(None),
            }),
            worker: Mutex::new(None),
            sample_interval: SAMPLE_INTERVAL,
        }
    }

    /// Override the sampling interval (mainly for tests)
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Current test state
    pub fn state(&self) -> TestState {
        self.shared.state()
    }

    /// Current progress snapshot
    pub fn progress(&self) -> TestProgress {
        self.shared.progress.read().clone()
    }

    /// Check if a run is in progress
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Register the progress callback (replaces any previous one)
    pub fn set_progress_callback(&self, callback: impl Fn(&TestProgress) + Send + Sync + 'static) {
        *self.shared.progress_cb.write() = Some(Arc::new(callback));
    }

    /// Register the completion callback (replaces any previous one)
    pub fn set_complete_callback(
        &self,
        callback: impl Fn(SessionId, TestState) + Send + Sync + 'static,
    ) {
        *self.shared.complete_cb.write() = Some(Arc::new(callback));
    }

    /// Start a test
    ///
    /// Returns `false` with no side effects when a run is already active,
    /// the device is disconnected, the profile fails validation, or the
    /// recorder refuses the session. Must be called from a runtime context;
    /// the worker is a spawned task.
    pub fn start(&self, profile: TestProfile, battery_name: &str, notes: &str) -> bool {
        if self.is_running() {
            debug!("Start refused: a test is already running");
            return false;
        }
        if !self.device.is_connected() {
            debug!("Start refused: device not connected");
            return false;
        }
        if let Err(e) = profile.validate() {
            warn!(error = %e, "Start refused: invalid profile");
            return false;
        }

        let meta = match SessionMeta::new(&profile, battery_name, notes) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "Start refused: could not build session metadata");
                return false;
            }
        };
        let session = match self.recorder.create_session(&meta) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Start refused: recorder rejected the session");
                return false;
            }
        };

        self.shared.cancel.store(false, Ordering::Release);
        self.shared.gate.send_replace(true);
        self.shared.set_state(TestState::Starting);
        *self.shared.progress.write() = TestProgress {
            state: TestState::Starting,
            ..TestProgress::default()
        };

        info!(profile = %profile.name, session, "Test started");

        let worker = Worker {
            device: self.device.clone(),
            recorder: Arc::clone(&self.recorder),
            shared: Arc::clone(&self.shared),
            sample_interval: self.sample_interval,
            session,
        };
        *self.worker.lock() = Some(tokio::spawn(worker.run(profile)));

        true
    }

    /// Stop the current test
    ///
    /// Raises the cancellation flag, forces the pause gate open, and joins
    /// the worker with a bounded timeout. A worker that fails to exit in
    /// time is reported as a logic error, never silently waited on.
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }

        self.shared.set_state(TestState::Stopping);
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.gate.send_replace(true);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if timeout(JOIN_TIMEOUT, handle).await.is_err() {
                error!(
                    "Worker did not stop within {}s; abandoning it",
                    JOIN_TIMEOUT.as_secs()
                );
            }
        }
    }

    /// Pause the current test; the load is commanded off while paused
    pub async fn pause(&self) {
        if self.state() != TestState::Running {
            return;
        }

        self.shared.set_state(TestState::Paused);
        self.shared.gate.send_replace(false);
        self.device.turn_off().await;
        self.shared.update_progress(|p| p.message = "Test paused".into());
    }

    /// Resume a paused test
    pub async fn resume(&self) {
        if self.state() != TestState::Paused {
            return;
        }

        self.shared.set_state(TestState::Running);
        self.shared.gate.send_replace(true);
        self.shared.update_progress(|p| p.message = "Test resumed".into());
    }

    /// Return a finished runner to `Idle`; refused while a run is active
    pub fn reset(&self) -> bool {
        if self.is_running() {
            return false;
        }

        self.shared.set_state(TestState::Idle);
        *self.shared.progress.write() = TestProgress::default();
        true
    }
}

/// Outcome of one discharge/sampling phase
enum Outcome {
    Cancelled,
    Cutoff,
    TimedOut,
}

/// State moved into the worker task
struct Worker {
    device: Device,
    recorder: Arc<dyn Recorder>,
    shared: Arc<Shared>,
    sample_interval: Duration,
    session: SessionId,
}

impl Worker {
    async fn run(self, profile: TestProfile) {
        self.shared.set_state(TestState::Running);

        if let Err(message) = self.execute(&profile).await {
            self.shared.set_state(TestState::Error);
            self.shared
                .update_progress(|p| p.message = format!("Error: {message}"));
        }

        self.finalize().await;
    }

    async fn execute(&self, profile: &TestProfile) -> Result<(), String> {
        match &profile.kind {
            ProfileKind::Discharge {
                current_a,
                voltage_cutoff,
                max_duration_s,
            } => {
                let limit = max_duration_s.map(Duration::from_secs);
                match self.discharge_phase(*current_a, *voltage_cutoff, limit).await? {
                    Outcome::Cutoff => self.shared.set_state(TestState::VoltageCutoff),
                    Outcome::TimedOut => self.shared.set_state(TestState::Timeout),
                    Outcome::Cancelled => {}
                }
                Ok(())
            }
            ProfileKind::Cycle {
                current_a,
                voltage_cutoff,
                num_cycles,
                rest_between_cycles_s,
            } => {
                self.run_cycle(
                    *current_a,
                    *voltage_cutoff,
                    *num_cycles,
                    Duration::from_secs(*rest_between_cycles_s),
                )
                .await
            }
            ProfileKind::Timed {
                current_a,
                duration_s,
                voltage_cutoff,
            } => {
                self.run_timed(*current_a, Duration::from_secs(*duration_s), *voltage_cutoff)
                    .await
            }
            ProfileKind::Stepped {
                steps,
                voltage_cutoff,
                rest_between_steps_s,
            } => {
                self.run_stepped(
                    steps,
                    *voltage_cutoff,
                    Duration::from_secs(*rest_between_steps_s),
                )
                .await
            }
        }
    }

    /// Shared discharge loop: reset counters, apply setpoint and cutoff,
    /// enable the load, then sample until a terminal condition. A cutoff of
    /// zero disables the voltage check.
    async fn discharge_phase(
        &self,
        current_a: f64,
        cutoff: f64,
        max_duration: Option<Duration>,
    ) -> Result<Outcome, String> {
        self.shared
            .update_progress(|p| p.message = format!("Starting discharge at {current_a}A"));

        self.device.reset_counters().await;
        sleep(SETTLE_DELAY).await;
        self.device.set_current(current_a).await;
        sleep(SETTLE_DELAY).await;
        if cutoff > 0.0 {
            self.device.set_voltage_cutoff(cutoff).await;
            sleep(SETTLE_DELAY).await;
        }
        self.device.turn_on().await;

        let started = Instant::now();
        let mut load_seen_on = false;

        loop {
            self.shared.wait_gate().await;
            if self.shared.cancelled() {
                return Ok(Outcome::Cancelled);
            }

            if let Some(status) = self.device.last_status() {
                self.record_reading(&status)?;

                if cutoff > 0.0 && status.voltage <= cutoff && status.load_on {
                    self.shared.update_progress(|p| {
                        p.message = format!("Voltage cutoff reached: {:.2}V", status.voltage)
                    });
                    return Ok(Outcome::Cutoff);
                }

                // The device dropped the load on its own: its internal
                // cutoff fired
                if load_seen_on && !status.load_on && self.shared.state() == TestState::Running {
                    self.shared
                        .update_progress(|p| p.message = "Device stopped (cutoff reached)".into());
                    return Ok(Outcome::Cutoff);
                }
                if status.load_on {
                    load_seen_on = true;
                }

                let elapsed = started.elapsed();
                self.shared.update_progress(|p| {
                    p.elapsed_seconds = elapsed.as_secs();
                    p.message = format!("{:.2}V @ {:.3}A", status.voltage, status.current);
                });

                if let Some(limit) = max_duration {
                    if elapsed >= limit {
                        self.shared
                            .update_progress(|p| p.message = "Maximum duration reached".into());
                        return Ok(Outcome::TimedOut);
                    }
                }
            }

            sleep(self.sample_interval).await;
        }
    }

    async fn run_cycle(
        &self,
        current_a: f64,
        cutoff: f64,
        num_cycles: u32,
        rest: Duration,
    ) -> Result<(), String> {
        self.shared.update_progress(|p| p.total_cycles = num_cycles);

        for cycle in 0..num_cycles {
            if self.shared.cancelled() {
                return Ok(());
            }

            self.shared.update_progress(|p| {
                p.current_cycle = cycle + 1;
                p.message = format!("Cycle {}/{}", cycle + 1, num_cycles);
            });

            // Reaching the cutoff is how a discharge cycle completes;
            // only cancellation ends the whole run early
            match self.discharge_phase(current_a, cutoff, None).await? {
                Outcome::Cancelled => return Ok(()),
                Outcome::Cutoff | Outcome::TimedOut => {}
            }

            if cycle + 1 < num_cycles {
                self.shared
                    .update_progress(|p| p.message = format!("Resting for {}s", rest.as_secs()));
                self.device.turn_off().await;
                if !self.rest(rest).await {
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn run_timed(
        &self,
        current_a: f64,
        duration: Duration,
        cutoff: Option<f64>,
    ) -> Result<(), String> {
        self.shared.update_progress(|p| {
            p.message = format!("Starting {}s test at {current_a}A", duration.as_secs())
        });

        self.device.reset_counters().await;
        sleep(SETTLE_DELAY).await;
        self.device.set_current(current_a).await;
        sleep(SETTLE_DELAY).await;
        if let Some(cutoff) = cutoff {
            if cutoff > 0.0 {
                self.device.set_voltage_cutoff(cutoff).await;
                sleep(SETTLE_DELAY).await;
            }
        }
        self.device.set_timer(duration.as_secs() as u32).await;
        sleep(SETTLE_DELAY).await;
        self.device.turn_on().await;

        let started = Instant::now();
        let mut load_seen_on = false;

        loop {
            self.shared.wait_gate().await;
            if self.shared.cancelled() {
                return Ok(());
            }

            if let Some(status) = self.device.last_status() {
                self.record_reading(&status)?;

                if let Some(cutoff) = cutoff {
                    if cutoff > 0.0 && status.voltage <= cutoff && status.load_on {
                        self.shared.set_state(TestState::VoltageCutoff);
                        self.shared.update_progress(|p| {
                            p.message = format!("Voltage cutoff reached: {:.2}V", status.voltage)
                        });
                        return Ok(());
                    }
                }

                let elapsed = started.elapsed();
                let remaining = duration.saturating_sub(elapsed);
                self.shared.update_progress(|p| {
                    p.elapsed_seconds = elapsed.as_secs();
                    p.message = format!("{}s remaining | {:.2}V", remaining.as_secs(), status.voltage);
                });

                if elapsed >= duration {
                    self.shared.set_state(TestState::Completed);
                    return Ok(());
                }

                // Device ended the run on its own (timer or cutoff)
                if load_seen_on && !status.load_on && self.shared.state() == TestState::Running {
                    self.shared.set_state(TestState::Completed);
                    return Ok(());
                }
                if status.load_on {
                    load_seen_on = true;
                }
            }

            sleep(self.sample_interval).await;
        }
    }

    async fn run_stepped(
        &self,
        steps: &[Step],
        cutoff: Option<f64>,
        rest: Duration,
    ) -> Result<(), String> {
        self.shared
            .update_progress(|p| p.total_steps = steps.len() as u32);

        self.device.reset_counters().await;
        sleep(SETTLE_DELAY).await;
        if let Some(cutoff) = cutoff {
            if cutoff > 0.0 {
                self.device.set_voltage_cutoff(cutoff).await;
                sleep(SETTLE_DELAY).await;
            }
        }

        let run_started = Instant::now();

        for (index, step) in steps.iter().enumerate() {
            if self.shared.cancelled() {
                return Ok(());
            }

            self.shared.update_progress(|p| {
                p.current_step = index as u32 + 1;
                p.message = format!(
                    "Step {}: {}A for {}s",
                    index + 1,
                    step.current_a,
                    step.duration_s
                );
            });

            self.device.set_current(step.current_a).await;
            sleep(SETTLE_DELAY).await;
            self.device.turn_on().await;

            let step_started = Instant::now();
            let step_duration = Duration::from_secs(step.duration_s);

            loop {
                self.shared.wait_gate().await;
                if self.shared.cancelled() {
                    return Ok(());
                }

                if let Some(status) = self.device.last_status() {
                    self.record_reading(&status)?;

                    // A breach ends the whole profile, not just this step
                    if let Some(cutoff) = cutoff {
                        if cutoff > 0.0 && status.voltage <= cutoff {
                            self.shared.set_state(TestState::VoltageCutoff);
                            self.shared.update_progress(|p| {
                                p.message =
                                    format!("Voltage cutoff reached: {:.2}V", status.voltage)
                            });
                            return Ok(());
                        }
                    }
                }

                let elapsed = run_started.elapsed();
                self.shared
                    .update_progress(|p| p.elapsed_seconds = elapsed.as_secs());

                if step_started.elapsed() >= step_duration {
                    break;
                }

                sleep(self.sample_interval).await;
            }

            if index + 1 < steps.len() && !self.shared.cancelled() {
                self.device.turn_off().await;
                if !self.rest(rest).await {
                    return Ok(());
                }
            }
        }

        self.shared.set_state(TestState::Completed);
        Ok(())
    }

    /// Cancellable rest with the load off; returns `false` when cancelled
    async fn rest(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.shared.cancelled() {
                return false;
            }
            let remaining = deadline.duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            sleep(remaining.min(Duration::from_secs(1))).await;
        }
    }

    fn record_reading(&self, status: &DeviceStatus) -> Result<(), String> {
        let reading = Reading {
            timestamp: Utc::now(),
            voltage: status.voltage,
            current: status.current,
            power: status.power,
            energy_wh: status.energy_wh,
            capacity_mah: status.capacity_mah,
            temperature_c: status.temperature_c,
            ext_temperature_c: status.ext_temperature_c,
            runtime_seconds: status.runtime_seconds(),
        };

        self.recorder
            .append_reading(self.session, &reading)
            .map_err(|e| format!("recorder failed: {e}"))
    }

    /// Always runs, whatever path the worker takes out: close the session,
    /// notify the host, and leave the hardware safe.
    async fn finalize(&self) {
        if let Err(e) = self.recorder.finalize_session(self.session, Utc::now()) {
            warn!(error = %e, "Failed to finalize session");
        }

        let callback = self.shared.complete_cb.read().clone();
        if let Some(callback) = callback {
            let state = self.shared.state();
            let session = self.session;
            if catch_unwind(AssertUnwindSafe(|| callback(session, state))).is_err() {
                warn!("Complete callback panicked");
            }
        }

        // Best effort: the load must not keep sinking after the run
        self.device.turn_off().await;

        if !self.shared.state().is_terminal() {
            self.shared.set_state(TestState::Completed);
        }

        self.shared.update_progress(|p| p.message = "Test complete".into());
        info!(session = self.session, state = %self.shared.state(), "Test finished");
    }
}
