//! The command execution engine shared by every simulated device.
//!
//! A [`SimulatorDevice`] is a cheap handle around `Arc<Shared>`. All mutable
//! state lives in one `DeviceCore` behind a `std::sync::Mutex`; long-running
//! commands run on spawned tokio tasks that take the lock only for short
//! sections and never across an await.

use crate::config::{DeviceConfig, WORKER_POLL_INTERVAL_MS};
use crate::devices::controller::{load_sys_param, SysParamSource};
use crate::devices::{obs_transition, AttributeUpdates, DeviceKind, KindAttributes};
use crate::events::{AttributeName, AttributeValue, ChangeEvent, EventPublisher};
use crate::fault_injection::{FaultFlags, FaultInjectionStats, FaultInjector};
use crate::protocol::{Command, CommandReply, ResultCode};
use crate::state::{check_allowed, AdminMode, CommandName, DevState, HealthState, ObsMode, ObsState};
use crate::tracker::{CommandTracker, TaskStatus};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(WORKER_POLL_INTERVAL_MS);
/// Percentages of `timeToComplete` at which a worker reports progress.
const PROGRESS_POINTS: [u8; 2] = [33, 66];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("{operation} not allowed: {reason}")]
    NotAllowed { operation: String, reason: String },
    #[error("{operation} failed: {reason}")]
    CommandExecution { operation: String, reason: String },
    #[error("invalid argument for {operation}: {reason}")]
    InvalidArgument { operation: String, reason: String },
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },
}

impl DeviceError {
    fn not_allowed(operation: impl ToString, reason: impl ToString) -> Self {
        DeviceError::NotAllowed {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    fn execution(operation: impl ToString, reason: impl ToString) -> Self {
        DeviceError::CommandExecution {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    fn invalid(operation: impl ToString, reason: impl ToString) -> Self {
        DeviceError::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    fn rejected(operation: impl ToString, reason: impl ToString) -> Self {
        DeviceError::Rejected {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Result code reported to remote clients for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            DeviceError::NotAllowed { .. } => ResultCode::NotAllowed,
            DeviceError::CommandExecution { .. } => ResultCode::Failed,
            DeviceError::InvalidArgument { .. } | DeviceError::Rejected { .. } => ResultCode::Rejected,
        }
    }
}

/// Point-in-time copy of a device's externally visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub kind: DeviceKind,
    pub admin_mode: AdminMode,
    pub state: DevState,
    pub health_state: HealthState,
    pub obs_state: Option<ObsState>,
    pub obs_mode: Option<ObsMode>,
    pub simulation_mode: bool,
    pub faults: FaultFlags,
    pub command_in_progress: Option<String>,
    pub latest_command: Option<(String, TaskStatus)>,
    pub latest_result: Option<(String, ResultCode)>,
    pub command_progress: Option<(String, u8)>,
    pub commands_in_queue: Vec<String>,
    pub command_ids_in_queue: Vec<String>,
}

#[derive(Debug)]
struct DeviceCore {
    admin_mode: AdminMode,
    state: DevState,
    health_state: HealthState,
    obs_state: Option<ObsState>,
    obs_mode: Option<ObsMode>,
    simulation_mode: bool,
    faults: FaultInjector,
    tracker: CommandTracker,
    attributes: KindAttributes,
    in_flight: Option<InFlight>,
    // Bumped by every long-running submission; a worker whose generation
    // no longer matches has been superseded and must not write.
    generation: u64,
}

#[derive(Debug, Clone)]
struct InFlight {
    id: String,
    command: CommandName,
}

/// Work handed to a spawned worker.
#[derive(Debug)]
struct Job {
    id: String,
    command: Command,
    payload: Option<Value>,
    generation: u64,
    previous_obs: Option<ObsState>,
    terminal: Option<ObsState>,
    delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug)]
struct Shared {
    config: DeviceConfig,
    core: Mutex<DeviceCore>,
    events: EventPublisher,
}

#[derive(Debug, Clone)]
pub struct SimulatorDevice {
    shared: Arc<Shared>,
}

impl SimulatorDevice {
    /// Create a device in its start-up state: OFFLINE, DISABLE.
    pub fn new(config: DeviceConfig) -> Self {
        let kind = config.kind;
        let core = DeviceCore {
            admin_mode: AdminMode::Offline,
            state: DevState::Disable,
            health_state: config.initial_health,
            obs_state: kind.initial_obs_state(),
            obs_mode: kind.has_obs_state().then_some(ObsMode::Idle),
            simulation_mode: true,
            faults: FaultInjector::new_with_policy(config.fault_policy, config.time_to_complete_s),
            tracker: CommandTracker::new(),
            attributes: KindAttributes::new(&config),
            in_flight: None,
            generation: 0,
        };
        let events = EventPublisher::new(&config.name);
        Self {
            shared: Arc::new(Shared {
                config,
                core: Mutex::new(core),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.shared.config.kind
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.shared.events.subscribe()
    }

    /// Execute a command.
    ///
    /// Synchronous commands return `OK` once applied. Long-running commands
    /// return `QUEUED` with the tracker id as message; their outcome is only
    /// visible through the tracker and its change events.
    pub fn invoke(&self, command: Command) -> Result<CommandReply, DeviceError> {
        let name = command.name();
        let payload = parse_argument(&command)?;
        let shared = &self.shared;
        let kind = shared.config.kind;

        let mut core = shared.lock();

        if !kind.exposes(name) {
            warn!(device = %shared.name(), command = %name, "command not available on this device");
            return Err(DeviceError::not_allowed(name, format!("not available on {}", shared.name())));
        }
        if shared.config.is_disabled(name) {
            warn!(device = %shared.name(), command = %name, "command disabled on this device, ignored");
            return Err(DeviceError::rejected(name, format!("ignored by {}", shared.name())));
        }
        if name.is_forced_override() {
            return Ok(shared.apply_forced(&mut core, &command));
        }
        if !core.admin_mode.accepts_commands() {
            warn!(device = %shared.name(), command = %name, admin_mode = ?core.admin_mode, "command refused");
            return Err(DeviceError::not_allowed(
                name,
                format!("device is in admin mode {:?}", core.admin_mode),
            ));
        }
        if let Err(rejection) = check_allowed(kind, core.state, core.obs_state, name) {
            warn!(device = %shared.name(), command = %name, %rejection, "command refused");
            return Err(DeviceError::not_allowed(name, rejection));
        }
        let long_running = is_long_running(&command, payload.as_ref());
        if let Some(in_flight) = &core.in_flight {
            if long_running && !name.preempts_in_flight() {
                warn!(device = %shared.name(), command = %name, busy = %in_flight.id, "command refused");
                return Err(DeviceError::not_allowed(
                    name,
                    format!("{} {} still in progress", in_flight.command, in_flight.id),
                ));
            }
        }

        if core.faults.take_raise_exception() {
            if !core.faults.get_flags().raise_exception {
                shared.push(AttributeName::RaiseException, AttributeValue::Bool(false));
            }
            warn!(device = %shared.name(), command = %name, "raiseException set, failing command");
            return Err(DeviceError::execution(name, "exception raised by fault injection"));
        }
        let faulty = core.faults.take_command_fault();
        if faulty && !core.faults.get_flags().faulty_in_command {
            shared.push(AttributeName::FaultyInCommand, AttributeValue::Bool(false));
        }

        if long_running {
            shared.submit(&mut core, command, payload, faulty)
        } else if faulty {
            warn!(device = %shared.name(), command = %name, "faultyInCommand set, failing command");
            Err(DeviceError::execution(name, "command failed by fault injection"))
        } else {
            Ok(shared.apply_sync(&mut core, &command, payload.as_ref()))
        }
    }

    pub fn read_attribute(&self, attribute: AttributeName) -> Result<AttributeValue, DeviceError> {
        let core = self.shared.lock();
        self.shared.read_value(&core, attribute).ok_or_else(|| {
            DeviceError::invalid(
                format!("read {attribute}"),
                format!("{:?} devices have no such attribute", self.kind()),
            )
        })
    }

    pub fn write_attribute(&self, attribute: AttributeName, value: AttributeValue) -> Result<(), DeviceError> {
        let operation = format!("write {attribute}");
        if !attribute.is_writable() {
            return Err(DeviceError::not_allowed(operation, "attribute is read-only"));
        }
        let shared = &self.shared;
        let mut core = shared.lock();

        match (attribute, value) {
            (AttributeName::AdminMode, AttributeValue::Admin(mode)) => {
                return shared.write_admin_mode(&mut core, mode);
            }
            (AttributeName::SimulationMode, AttributeValue::Bool(enabled)) => {
                core.simulation_mode = enabled;
            }
            (AttributeName::FaultyInCommand, AttributeValue::Bool(enabled)) => {
                core.faults.set_faulty_in_command(enabled);
            }
            (AttributeName::RaiseException, AttributeValue::Bool(enabled)) => {
                core.faults.set_raise_exception(enabled);
            }
            (AttributeName::ObsFaulty, AttributeValue::Bool(enabled)) => {
                if !self.kind().has_obs_state() {
                    return Err(DeviceError::invalid(operation, "device has no observation state"));
                }
                core.faults.set_obs_faulty(enabled);
            }
            (AttributeName::TimeToComplete, AttributeValue::Seconds(seconds)) => {
                core.faults
                    .set_time_to_complete(seconds)
                    .map_err(|s| DeviceError::invalid(&operation, format!("{s} is not a valid duration")))?;
            }
            (_, other) => {
                return Err(DeviceError::invalid(operation, format!("unexpected value {other:?}")));
            }
        }

        info!(device = %shared.name(), %attribute, "attribute written");
        if let Some(value) = shared.read_value(&core, attribute) {
            shared.push(attribute, value);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let core = self.shared.lock();
        DeviceSnapshot {
            name: self.name().to_string(),
            kind: self.kind(),
            admin_mode: core.admin_mode,
            state: core.state,
            health_state: core.health_state,
            obs_state: core.obs_state,
            obs_mode: core.obs_mode,
            simulation_mode: core.simulation_mode,
            faults: *core.faults.get_flags(),
            command_in_progress: core.in_flight.as_ref().map(|f| f.id.clone()),
            latest_command: core.tracker.latest(),
            latest_result: core.tracker.latest_result(),
            command_progress: core.tracker.current_progress(),
            commands_in_queue: core.tracker.names_in_queue(),
            command_ids_in_queue: core.tracker.ids_in_queue(),
        }
    }

    /// Whether `command` would pass the admin-mode and legality checks now.
    pub fn is_allowed(&self, command: CommandName) -> bool {
        let core = self.shared.lock();
        let kind = self.kind();
        if !kind.exposes(command) || self.shared.config.is_disabled(command) {
            return false;
        }
        command.is_forced_override()
            || (core.admin_mode.accepts_commands()
                && check_allowed(kind, core.state, core.obs_state, command).is_ok())
    }

    pub fn command_status(&self, id: &str) -> Option<TaskStatus> {
        self.shared.lock().tracker.status(id)
    }

    pub fn command_result(&self, id: &str) -> Option<ResultCode> {
        self.shared.lock().tracker.get_record(id).and_then(|r| r.result)
    }

    pub fn command_statuses(&self) -> Vec<(String, TaskStatus)> {
        self.shared.lock().tracker.statuses()
    }

    pub fn fault_stats(&self) -> FaultInjectionStats {
        *self.shared.lock().faults.get_stats()
    }

    /// Poll the tracker until `id` reaches a terminal status or `timeout`
    /// elapses. Returns the last status seen.
    pub async fn wait_for_command(&self, id: &str, timeout: Duration) -> Option<TaskStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.command_status(id);
            if status.map_or(true, TaskStatus::is_terminal) || Instant::now() >= deadline {
                return status;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeviceCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn push(&self, attribute: AttributeName, value: AttributeValue) {
        self.events.push(attribute, value);
    }

    fn push_updates(&self, updates: AttributeUpdates) {
        for (attribute, value) in updates {
            self.push(attribute, value);
        }
    }

    fn set_state(&self, core: &mut DeviceCore, state: DevState) {
        if core.state != state {
            info!(device = %self.name(), from = ?core.state, to = ?state, "state transition");
        }
        core.state = state;
        self.push(AttributeName::State, AttributeValue::State(state));
    }

    fn set_health(&self, core: &mut DeviceCore, health: HealthState) {
        core.health_state = health;
        self.push(AttributeName::HealthState, AttributeValue::Health(health));
    }

    fn set_obs_state(&self, core: &mut DeviceCore, obs: ObsState) {
        let Some(current) = core.obs_state else {
            return;
        };
        if current != obs {
            info!(device = %self.name(), from = ?current, to = ?obs, "obsState transition");
        }
        core.obs_state = Some(obs);
        self.push(AttributeName::ObsState, AttributeValue::Obs(obs));
    }

    fn set_obs_mode(&self, core: &mut DeviceCore, mode: ObsMode) {
        if core.obs_mode.is_none() {
            return;
        }
        core.obs_mode = Some(mode);
        self.push(AttributeName::ObsMode, AttributeValue::Mode(mode));
    }

    fn read_value(&self, core: &DeviceCore, attribute: AttributeName) -> Option<AttributeValue> {
        let flags = core.faults.get_flags();
        match attribute {
            AttributeName::State => Some(AttributeValue::State(core.state)),
            AttributeName::HealthState => Some(AttributeValue::Health(core.health_state)),
            AttributeName::AdminMode => Some(AttributeValue::Admin(core.admin_mode)),
            AttributeName::ObsState => core.obs_state.map(AttributeValue::Obs),
            AttributeName::ObsMode => core.obs_mode.map(AttributeValue::Mode),
            AttributeName::SimulationMode => Some(AttributeValue::Bool(core.simulation_mode)),
            AttributeName::FaultyInCommand => Some(AttributeValue::Bool(flags.faulty_in_command)),
            AttributeName::RaiseException => Some(AttributeValue::Bool(flags.raise_exception)),
            AttributeName::ObsFaulty => core
                .obs_state
                .map(|_| AttributeValue::Bool(flags.obs_faulty)),
            AttributeName::TimeToComplete => Some(AttributeValue::Seconds(flags.time_to_complete_s)),
            AttributeName::LongRunningCommandStatus => {
                Some(AttributeValue::CommandStatus(core.tracker.latest()))
            }
            AttributeName::LongRunningCommandResult => {
                Some(AttributeValue::CommandResult(core.tracker.latest_result()))
            }
            AttributeName::LongRunningCommandProgress => {
                Some(AttributeValue::CommandProgress(core.tracker.current_progress()))
            }
            AttributeName::LongRunningCommandsInQueue => Some(AttributeValue::Names(core.tracker.names_in_queue())),
            AttributeName::LongRunningCommandIdsInQueue => Some(AttributeValue::Ids(core.tracker.ids_in_queue())),
            _ => core.attributes.read(attribute),
        }
    }

    fn write_admin_mode(&self, core: &mut DeviceCore, mode: AdminMode) -> Result<(), DeviceError> {
        if core.admin_mode == AdminMode::Online && matches!(mode, AdminMode::NotFitted | AdminMode::Reserved) {
            return Err(DeviceError::not_allowed(
                "write adminMode",
                format!("an ONLINE device must go OFFLINE before {mode:?}"),
            ));
        }
        let was_accepting = core.admin_mode.accepts_commands();
        info!(device = %self.name(), from = ?core.admin_mode, to = ?mode, "adminMode change");
        core.admin_mode = mode;
        self.push(AttributeName::AdminMode, AttributeValue::Admin(mode));

        if !mode.accepts_commands() {
            self.set_state(core, DevState::Disable);
        } else if !was_accepting {
            self.set_state(core, self.config.online_state);
            self.set_health(core, self.config.initial_health);
        } else {
            let state = core.state;
            self.set_state(core, state);
        }
        Ok(())
    }

    fn apply_forced(&self, core: &mut DeviceCore, command: &Command) -> CommandReply {
        match *command {
            Command::ForceState(state) => self.set_state(core, state),
            Command::ForceHealthState(health) => self.set_health(core, health),
            Command::ForceObsState(obs) => self.set_obs_state(core, obs),
            Command::ForceObsMode(mode) => self.set_obs_mode(core, mode),
            _ => {}
        }
        info!(device = %self.name(), ?command, "forced override applied");
        CommandReply::ok(format!("{} completed", command.name()))
    }

    fn apply_sync(&self, core: &mut DeviceCore, command: &Command, payload: Option<&Value>) -> CommandReply {
        match command {
            Command::On => self.set_state(core, DevState::On),
            Command::Off => self.set_state(core, DevState::Off),
            Command::Standby => self.set_state(core, DevState::Standby),
            Command::InitSysParam(_) => {
                if let (Some(document), Some(attrs)) = (payload, core.attributes.controller_mut()) {
                    let updates = attrs.apply_inline(document);
                    self.push_updates(updates);
                }
            }
            _ => {}
        }
        info!(device = %self.name(), command = %command.name(), "command completed");
        CommandReply::ok(format!("{} completed OK", command.name()))
    }

    fn submit(
        self: &Arc<Self>,
        core: &mut DeviceCore,
        command: Command,
        payload: Option<Value>,
        faulty: bool,
    ) -> Result<CommandReply, DeviceError> {
        let name = command.name();
        let handle = Handle::try_current()
            .map_err(|_| DeviceError::execution(name, "no async runtime to run a long-running command"))?;
        // Resolved before anything is mutated so a refusal leaves no trace
        let delay = if name.preempts_in_flight() {
            self.config.transition_latency()
        } else {
            core.faults
                .time_to_complete()
                .ok_or_else(|| DeviceError::execution(name, "timeToComplete is not a representable duration"))?
        };

        let id = core.tracker.submit(name);
        self.push_record(core, &id);

        if faulty {
            warn!(device = %self.name(), command = %name, %id, "faultyInCommand set, command will fail");
            let shared = Arc::clone(self);
            let failed_id = id.clone();
            handle.spawn(async move {
                let mut core = shared.lock();
                shared.resolve(&mut core, &failed_id, Outcome::Failed);
            });
            return Ok(CommandReply::queued(id));
        }

        let previous_obs = core.obs_state;
        core.generation += 1;
        let generation = core.generation;

        if let Some(superseded) = core.in_flight.take() {
            let outcome = if name == CommandName::EndScan && superseded.command == CommandName::Scan {
                Outcome::Completed
            } else {
                Outcome::Aborted
            };
            info!(device = %self.name(), superseded = %superseded.id, by = %name, ?outcome, "in-flight command superseded");
            self.resolve(core, &superseded.id, outcome);
        }

        if matches!(name, CommandName::Restart | CommandName::ObsReset) && core.faults.get_flags().obs_faulty {
            core.faults.set_obs_faulty(false);
            self.push(AttributeName::ObsFaulty, AttributeValue::Bool(false));
        }

        let transition = obs_transition(name);
        if let Some(obs) = transition.intermediate {
            self.set_obs_state(core, obs);
        }
        let updates = core.attributes.on_accepted(name, payload.as_ref());
        self.push_updates(updates);

        core.in_flight = Some(InFlight {
            id: id.clone(),
            command: name,
        });

        let job = Job {
            id: id.clone(),
            command,
            payload,
            generation,
            previous_obs,
            terminal: transition.terminal,
            delay,
        };
        handle.spawn(Arc::clone(self).run(job));

        info!(device = %self.name(), command = %name, %id, ?delay, "long-running command queued");
        Ok(CommandReply::queued(id))
    }

    async fn run(self: Arc<Self>, job: Job) {
        {
            let mut core = self.lock();
            if core.generation != job.generation {
                return;
            }
            if let Err(e) = core.tracker.mark_in_progress(&job.id) {
                debug!(device = %self.name(), error = %e, "worker not started");
                return;
            }
            self.push_record(&core, &job.id);
        }

        let started = Instant::now();
        let mut reported = 0;
        loop {
            let elapsed = started.elapsed();
            {
                let mut core = self.lock();
                if core.generation != job.generation {
                    debug!(device = %self.name(), id = %job.id, "worker superseded");
                    return;
                }
                if self.check_faults(&mut core, &job) {
                    return;
                }
                while let Some(&percent) = PROGRESS_POINTS.get(reported) {
                    if elapsed < job.delay.mul_f64(f64::from(percent) / 100.0) {
                        break;
                    }
                    self.report_progress(&mut core, &job.id, percent);
                    reported += 1;
                }
            }
            if elapsed >= job.delay {
                break;
            }
            sleep((job.delay - elapsed).min(POLL_INTERVAL)).await;
        }

        let loaded = if job.command.name() == CommandName::InitSysParam {
            let file_path = match job.payload.as_ref().map(SysParamSource::classify) {
                Some(SysParamSource::Uri { file_path }) => file_path,
                _ => None,
            };
            Some(load_sys_param(file_path).await)
        } else {
            None
        };

        let mut core = self.lock();
        if core.generation != job.generation {
            debug!(device = %self.name(), id = %job.id, "worker superseded");
            return;
        }
        self.finish_job(&mut core, &job, loaded);
    }

    /// Returns true when a fault ended the job.
    fn check_faults(&self, core: &mut DeviceCore, job: &Job) -> bool {
        let name = job.command.name();
        if core.obs_state.is_some() && core.faults.check_obs_fault() {
            warn!(device = %self.name(), command = %name, id = %job.id, "obsFaulty set, observation faulted");
            self.set_obs_state(core, ObsState::Fault);
            self.resolve(core, &job.id, Outcome::Failed);
            return true;
        }
        if core.faults.take_execution_fault() {
            if !core.faults.get_flags().faulty_in_command {
                self.push(AttributeName::FaultyInCommand, AttributeValue::Bool(false));
            }
            warn!(device = %self.name(), command = %name, id = %job.id, "faultyInCommand set during execution");
            if let Some(previous) = job.previous_obs {
                self.set_obs_state(core, previous);
            }
            self.resolve(core, &job.id, Outcome::Failed);
            return true;
        }
        false
    }

    fn finish_job(&self, core: &mut DeviceCore, job: &Job, loaded: Option<Result<String, String>>) {
        let name = job.command.name();

        if let Some(loaded) = loaded {
            let source = job.command.argument().unwrap_or_default();
            let failure = loaded.as_ref().err().cloned();
            if let Some(attrs) = core.attributes.controller_mut() {
                let updates = attrs.apply_uri(source, loaded.ok());
                self.push_updates(updates);
            }
            if let Some(reason) = failure {
                warn!(device = %self.name(), id = %job.id, %reason, "sys-param load failed");
                self.resolve(core, &job.id, Outcome::Failed);
                return;
            }
        }

        if let Some(obs) = job.terminal {
            self.set_obs_state(core, obs);
        }
        match name {
            CommandName::Configure => {
                let mode = configured_obs_mode(self.config.kind, job.payload.as_ref());
                self.set_obs_mode(core, mode);
            }
            CommandName::GoToIdle | CommandName::Restart | CommandName::ObsReset => {
                self.set_obs_mode(core, ObsMode::Idle);
            }
            _ => {}
        }
        let updates = core.attributes.on_completed(name, job.payload.as_ref());
        self.push_updates(updates);

        self.resolve(core, &job.id, Outcome::Completed);
        info!(device = %self.name(), command = %name, id = %job.id, "long-running command completed");
    }

    fn resolve(&self, core: &mut DeviceCore, id: &str, outcome: Outcome) {
        let result = match outcome {
            Outcome::Completed => core.tracker.complete(id, ResultCode::Ok),
            Outcome::Failed => core.tracker.fail(id, ResultCode::Failed),
            Outcome::Aborted => core.tracker.abort(id),
        };
        if let Err(e) = result {
            warn!(device = %self.name(), error = %e, "tracker update rejected");
            return;
        }
        if core.in_flight.as_ref().is_some_and(|f| f.id == id) {
            core.in_flight = None;
        }
        self.push_record(core, id);
        self.push(
            AttributeName::LongRunningCommandResult,
            AttributeValue::CommandResult(core.tracker.latest_result()),
        );
    }

    fn report_progress(&self, core: &mut DeviceCore, id: &str, percent: u8) {
        if let Err(e) = core.tracker.set_progress(id, percent) {
            debug!(device = %self.name(), error = %e, "progress not recorded");
            return;
        }
        debug!(device = %self.name(), %id, percent, "command progress");
        self.push(
            AttributeName::LongRunningCommandProgress,
            AttributeValue::CommandProgress(Some((id.to_string(), percent))),
        );
    }

    fn push_record(&self, core: &DeviceCore, id: &str) {
        let status = core.tracker.status(id).map(|status| (id.to_string(), status));
        self.push(AttributeName::LongRunningCommandStatus, AttributeValue::CommandStatus(status));
        self.push(
            AttributeName::LongRunningCommandsInQueue,
            AttributeValue::Names(core.tracker.names_in_queue()),
        );
        self.push(
            AttributeName::LongRunningCommandIdsInQueue,
            AttributeValue::Ids(core.tracker.ids_in_queue()),
        );
    }
}

/// Parse and validate a command's JSON argument.
fn parse_argument(command: &Command) -> Result<Option<Value>, DeviceError> {
    let Some(text) = command.argument() else {
        return Ok(None);
    };
    let name = command.name();
    let value: Value =
        serde_json::from_str(text).map_err(|e| DeviceError::invalid(name, format!("malformed JSON: {e}")))?;
    if !value.is_object() {
        return Err(DeviceError::invalid(name, "expected a JSON object"));
    }
    match name {
        CommandName::Configure => {
            if let Some(mode) = value.get("obs_mode") {
                serde_json::from_value::<ObsMode>(mode.clone())
                    .map_err(|e| DeviceError::invalid(name, format!("bad obs_mode: {e}")))?;
            }
        }
        CommandName::Scan => {
            if value.get("scan_id").is_some_and(|id| id.as_u64().is_none()) {
                return Err(DeviceError::invalid(name, "scan_id must be a non-negative integer"));
            }
        }
        _ => {}
    }
    Ok(Some(value))
}

fn is_long_running(command: &Command, payload: Option<&Value>) -> bool {
    match command.name() {
        CommandName::On | CommandName::Off | CommandName::Standby => false,
        name if name.is_forced_override() => false,
        CommandName::InitSysParam => {
            matches!(payload.map(SysParamSource::classify), Some(SysParamSource::Uri { .. }))
        }
        _ => true,
    }
}

fn configured_obs_mode(kind: DeviceKind, payload: Option<&Value>) -> ObsMode {
    payload
        .and_then(|p| p.get("obs_mode"))
        .and_then(|mode| serde_json::from_value(mode.clone()).ok())
        .unwrap_or(match kind {
            DeviceKind::Beam => ObsMode::PulsarTiming,
            _ => ObsMode::Imaging,
        })
}
