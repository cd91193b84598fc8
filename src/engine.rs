//! # Run Engine
//!
//! Stateful run tracking engine that owns one run from permission prompts to
//! the hand-off of a completed record.
//!
//! ## Architecture
//!
//! The engine is driven by a single owner (the active run screen, a service,
//! a test) through plain method calls:
//! - `start` / `pause` / `resume` / `stop` / `abort` for the lifecycle
//! - `tick` from a timer, which also drains location batches and
//!   notification actions that arrived in the meantime
//!
//! Because every entry point takes `&mut self`, events are applied strictly in
//! the order the owner observes them. Elapsed time is re-derived from the
//! clock on every call rather than counted, so missed ticks and long pauses
//! cannot skew it.
//!
//! ```text
//! Initializing ──start──▶ Active ◀──resume── Paused
//!      │                    │ └────pause────▶  │
//!      │                    ▼                  ▼
//!      │                Finalizing ◀───────────┘
//!      │                    │ save ok
//!      ▼                    ▼
//!   Aborted ◀──abort──  Completed
//! ```

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::geo_utils::{pace, total_distance};
use crate::location::{LocationStream, PermissionStatus, TrackingMode};
use crate::notification::{
    project, ActionSubscription, NotificationAction, NotificationPayload, NotificationSink,
    RUN_NOTIFICATION_ID,
};
use crate::weather::{spawn_weather_task, WeatherService, WeatherTaskHandle};
use crate::{
    Clock, CompletedRun, GpsInterval, LocationProvider, LocationSample, Result, RunConfig,
    RunId, RunKind, RunStore, RunTrackError, SettingsProvider, SystemClock,
};

const TRACKING_MODES: [TrackingMode; 2] = [TrackingMode::Foreground, TrackingMode::Background];

// ============================================================================
// Core Types
// ============================================================================

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Acquiring permissions and the first fix
    Initializing,
    Active,
    Paused,
    /// Stopped; saving the completed run
    Finalizing,
    /// Saved and handed off
    Completed,
    /// Ended without saving
    Aborted,
}

impl RunState {
    /// Active or paused: the run is live and leaving must be confirmed.
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Active | RunState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a run stopped itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoStopReason {
    TargetTimeReached,
    TargetDistanceReached,
}

/// Destructive action waiting for user confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// End the run and save it
    Stop,
    /// Leave the screen and discard the run
    Exit,
}

/// Answer to a navigation-away attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Nothing live; let navigation proceed
    Allow,
    /// Hold navigation until the user confirms or cancels
    Confirm,
}

/// Lifecycle events for the UI and other collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    Paused,
    Resumed,
    AutoStopped(AutoStopReason),
    ConfirmationRequested(Confirmation),
    ConfirmationCancelled(Confirmation),
    ManuallyStopped,
    /// Location updates could not be restarted; the run continues without them
    TrackingInterrupted(RunTrackError),
    /// The sensor had no fix for a tick; the subscription stays up
    SensorGap(TrackingMode),
    /// Save failed; the run is kept for a retry
    SaveFailed(RunTrackError),
    Completed(RunId),
    /// `None` when the user abandoned the run
    Aborted(Option<RunTrackError>),
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum time between periodic notification refreshes.
    /// Default: 5000 ms
    pub notification_refresh_millis: i64,

    /// Identity of the live notification.
    /// Default: "active-run-notification"
    pub notification_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notification_refresh_millis: 5_000,
            notification_id: RUN_NOTIFICATION_ID.to_string(),
        }
    }
}

// ============================================================================
// Run Session
// ============================================================================

/// Mutable aggregate for one live run.
#[derive(Debug, Clone)]
pub struct RunSession {
    config: RunConfig,
    state: RunState,
    samples: Vec<LocationSample>,
    started_at_millis: i64,
    paused_accumulated_millis: i64,
    current_pause_started_at_millis: Option<i64>,
    cumulative_distance_miles: f64,
}

impl RunSession {
    fn new(config: RunConfig, started_at_millis: i64, initial_fix: Option<LocationSample>) -> Self {
        let mut session = Self {
            config,
            state: RunState::Active,
            samples: Vec::new(),
            started_at_millis,
            paused_accumulated_millis: 0,
            current_pause_started_at_millis: None,
            cumulative_distance_miles: 0.0,
        };
        if let Some(fix) = initial_fix {
            session.append(&[fix]);
        }
        session
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn samples(&self) -> &[LocationSample] {
        &self.samples
    }

    pub fn started_at_millis(&self) -> i64 {
        self.started_at_millis
    }

    pub fn paused_accumulated_millis(&self) -> i64 {
        self.paused_accumulated_millis
    }

    pub fn current_pause_started_at_millis(&self) -> Option<i64> {
        self.current_pause_started_at_millis
    }

    pub fn distance_miles(&self) -> f64 {
        self.cumulative_distance_miles
    }

    /// Whole seconds of active time at `now_millis`; frozen while paused.
    pub fn elapsed_seconds(&self, now_millis: i64) -> u64 {
        let until = self.current_pause_started_at_millis.unwrap_or(now_millis);
        let active = until - self.started_at_millis - self.paused_accumulated_millis;
        (active.max(0) / 1000) as u64
    }

    fn append(&mut self, samples: &[LocationSample]) {
        self.samples.extend_from_slice(samples);
        self.cumulative_distance_miles = total_distance(&self.samples);
    }

    fn begin_pause(&mut self, now_millis: i64) {
        self.current_pause_started_at_millis = Some(now_millis);
        self.state = RunState::Paused;
    }

    /// Close the current pause and return its length.
    fn end_pause(&mut self, now_millis: i64) -> i64 {
        let paused = self
            .current_pause_started_at_millis
            .take()
            .map(|started| (now_millis - started).max(0))
            .unwrap_or(0);
        self.paused_accumulated_millis += paused;
        self.state = RunState::Active;
        paused
    }

    fn auto_stop_reason(&self, now_millis: i64) -> Option<AutoStopReason> {
        if self.state != RunState::Active {
            return None;
        }
        match self.config.kind() {
            RunKind::Timed => self
                .config
                .target_seconds()
                .filter(|&target| self.elapsed_seconds(now_millis) >= u64::from(target))
                .map(|_| AutoStopReason::TargetTimeReached),
            RunKind::Distance => self
                .config
                .target_miles()
                .filter(|&target| self.cumulative_distance_miles >= target)
                .map(|_| AutoStopReason::TargetDistanceReached),
            RunKind::Free => None,
        }
    }

    fn complete(&self, ended_at_millis: i64) -> CompletedRun {
        CompletedRun {
            config: self.config.clone(),
            started_at_millis: self.started_at_millis,
            ended_at_millis,
            elapsed_seconds: self.elapsed_seconds(ended_at_millis),
            total_distance_miles: self.cumulative_distance_miles,
            samples: self.samples.clone(),
        }
    }
}

/// Live metrics for the active run screen.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub state: RunState,
    pub kind: Option<RunKind>,
    pub elapsed_seconds: u64,
    pub distance_miles: f64,
    /// `M:SS` per mile
    pub pace: String,
    /// Timed runs only
    pub remaining_seconds: Option<u64>,
    /// Distance runs only
    pub remaining_miles: Option<f64>,
    /// Fraction of the target reached, 0 for free runs
    pub progress: f64,
    pub sample_count: usize,
    pub gps_interval_seconds: u32,
    pub is_paused: bool,
}

// ============================================================================
// Run Engine
// ============================================================================

/// The run tracking state machine.
///
/// One engine tracks at most one run; create a new engine for the next run.
pub struct RunEngine {
    config: EngineConfig,

    // Collaborators
    stream: LocationStream,
    notifications: Box<dyn NotificationSink>,
    store: Box<dyn RunStore>,
    settings: Box<dyn SettingsProvider>,
    weather: Option<Arc<dyn WeatherService>>,
    clock: Arc<dyn Clock>,

    // Run state
    session: Option<RunSession>,
    /// State reported while no session exists
    resting_state: RunState,
    /// Record being saved, built once when finalization begins
    completed: Option<CompletedRun>,
    pending_confirmation: Option<Confirmation>,
    gps_interval: GpsInterval,
    weather_enabled: bool,

    // Timers and side channels, released together by `teardown`
    timers_running: bool,
    last_notification_millis: Option<i64>,
    notification_visible: bool,
    actions: Option<ActionSubscription>,

    weather_task: Option<WeatherTaskHandle>,
    events: Vec<EngineEvent>,
}

impl RunEngine {
    /// Create an engine with the system clock and default configuration.
    pub fn new(
        provider: Box<dyn LocationProvider>,
        notifications: Box<dyn NotificationSink>,
        store: Box<dyn RunStore>,
        settings: Box<dyn SettingsProvider>,
    ) -> Self {
        Self {
            config: EngineConfig::default(),
            stream: LocationStream::new(provider),
            notifications,
            store,
            settings,
            weather: None,
            clock: Arc::new(SystemClock),
            session: None,
            resting_state: RunState::Initializing,
            completed: None,
            pending_confirmation: None,
            gps_interval: GpsInterval::default(),
            weather_enabled: false,
            timers_running: false,
            last_notification_millis: None,
            notification_visible: false,
            actions: None,
            weather_task: None,
            events: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach weather to runs after they are saved (when enabled in settings).
    pub fn with_weather(mut self, weather: Arc<dyn WeatherService>) -> Self {
        self.weather = Some(weather);
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Acquire permissions, subscribe to location updates and begin the run.
    ///
    /// Any failure leaves the engine `Aborted` with no session created.
    pub fn start(&mut self, config: RunConfig) -> Result<()> {
        if self.session.is_some() || self.resting_state != RunState::Initializing {
            return Err(self.invalid("start"));
        }

        info!("[RunEngine] Starting {}", config.kind().label());

        let settings = match self.settings.settings() {
            Ok(settings) => settings,
            Err(e) => return Err(self.abort_start(e)),
        };
        self.gps_interval = settings.gps_interval;
        self.weather_enabled = settings.weather_tracking_enabled;

        if let Err(e) = self.stream.request_permissions() {
            return Err(self.abort_start(e));
        }
        if self.notifications.request_permission() == PermissionStatus::Denied {
            warn!("[RunEngine] Notification permission denied, tracking without it");
        }

        let initial_fix = self.stream.current_location();
        let started_at = self.clock.now_millis();

        for mode in TRACKING_MODES {
            if let Err(e) = self.stream.subscribe(mode, self.gps_interval) {
                return Err(self.abort_start(e));
            }
        }

        let (subscription, dispatcher) = ActionSubscription::new();
        self.notifications.register_actions(dispatcher);
        self.actions = Some(subscription);

        self.session = Some(RunSession::new(config, started_at, initial_fix));
        self.timers_running = true;

        info!(
            "[RunEngine] Run active (GPS every {}s, initial fix: {})",
            self.gps_interval.seconds(),
            initial_fix.is_some()
        );
        self.events.push(EngineEvent::Started);
        self.push_notification(started_at);
        Ok(())
    }

    /// Freeze the timer and stop location updates.
    ///
    /// Ignored unless the run is active; returns whether the run paused.
    pub fn pause(&mut self) -> bool {
        // Samples delivered before the request still belong to the run
        self.process_locations();

        if self.state() != RunState::Active {
            debug!("[RunEngine] Ignoring pause while {}", self.state());
            return false;
        }

        let now = self.clock.now_millis();
        if let Some(session) = self.session.as_mut() {
            session.begin_pause(now);
            info!(
                "[RunEngine] Paused at {}s",
                session.elapsed_seconds(now)
            );
        }
        self.stream.unsubscribe_all();

        self.events.push(EngineEvent::Paused);
        self.push_notification(now);
        true
    }

    /// Resume the timer and location updates.
    ///
    /// Ignored unless the run is paused; returns whether the run resumed.
    pub fn resume(&mut self) -> bool {
        if self.state() != RunState::Paused {
            debug!("[RunEngine] Ignoring resume while {}", self.state());
            return false;
        }

        let now = self.clock.now_millis();
        if let Some(session) = self.session.as_mut() {
            let paused = session.end_pause(now);
            info!("[RunEngine] Resumed after {}ms paused", paused);
        }
        self.events.push(EngineEvent::Resumed);

        for mode in TRACKING_MODES {
            if let Err(e) = self.stream.subscribe(mode, self.gps_interval) {
                warn!("[RunEngine] Failed to resume {:?} tracking: {}", mode, e);
                self.events.push(EngineEvent::TrackingInterrupted(e));
            }
        }

        self.push_notification(now);
        true
    }

    /// Ask the user to confirm ending the run.
    pub fn request_stop(&mut self) -> bool {
        if !self.state().is_running() {
            debug!("[RunEngine] Ignoring stop request while {}", self.state());
            return false;
        }
        self.request_confirmation(Confirmation::Stop);
        true
    }

    /// Navigation is about to leave the run screen.
    ///
    /// While a run is live (or waiting on a retryable save) leaving would
    /// discard it, so navigation must wait for confirmation.
    pub fn request_exit(&mut self) -> ExitDecision {
        match self.state() {
            RunState::Active | RunState::Paused | RunState::Finalizing => {
                self.request_confirmation(Confirmation::Exit);
                ExitDecision::Confirm
            }
            _ => ExitDecision::Allow,
        }
    }

    /// The user confirmed the pending action.
    pub fn confirm(&mut self) -> Result<()> {
        match self.pending_confirmation.take() {
            Some(Confirmation::Stop) => self.stop().map(|_| ()),
            Some(Confirmation::Exit) => {
                self.abort();
                Ok(())
            }
            None => {
                debug!("[RunEngine] Nothing to confirm");
                Ok(())
            }
        }
    }

    /// The user backed out of the pending action; the run is unchanged.
    pub fn cancel_confirmation(&mut self) -> bool {
        match self.pending_confirmation.take() {
            Some(confirmation) => {
                debug!("[RunEngine] {:?} cancelled", confirmation);
                self.events
                    .push(EngineEvent::ConfirmationCancelled(confirmation));
                true
            }
            None => false,
        }
    }

    /// Confirmed manual stop: end the run and save it.
    ///
    /// In `Finalizing` this retries the save.
    pub fn stop(&mut self) -> Result<RunId> {
        match self.state() {
            RunState::Active | RunState::Paused => {
                info!("[RunEngine] Stopped by user");
                self.pending_confirmation = None;
                self.events.push(EngineEvent::ManuallyStopped);
                self.finalize()
            }
            RunState::Finalizing => self.finalize(),
            _ => Err(self.invalid("stop")),
        }
    }

    /// Tear down tracking and save the completed run.
    ///
    /// On a save failure the engine stays in `Finalizing` with the record
    /// intact; call again to retry.
    pub fn finalize(&mut self) -> Result<RunId> {
        match self.state() {
            RunState::Active | RunState::Paused => {
                let now = self.clock.now_millis();
                if let Some(session) = self.session.as_mut() {
                    session.state = RunState::Finalizing;
                    self.completed = Some(session.complete(now));
                }
                if let Some(run) = self.completed.as_ref() {
                    info!(
                        "[RunEngine] Finalizing: {:.2} mi in {}s ({} samples)",
                        run.total_distance_miles,
                        run.elapsed_seconds,
                        run.samples.len()
                    );
                }
            }
            RunState::Finalizing => debug!("[RunEngine] Retrying save"),
            _ => return Err(self.invalid("finalize")),
        }

        self.teardown();

        let record = match self.completed.as_ref() {
            Some(record) => record,
            None => return Err(self.invalid("finalize")),
        };

        match self.store.save_completed_run(record) {
            Ok(run_id) => {
                let run = self.completed.take();
                self.session = None;
                self.resting_state = RunState::Completed;
                self.pending_confirmation = None;

                info!("[RunEngine] Saved run {}", run_id);
                self.events.push(EngineEvent::Completed(run_id));
                if let Some(run) = run {
                    self.spawn_weather(run_id, &run);
                }
                Ok(run_id)
            }
            Err(e) => {
                let error = match e {
                    RunTrackError::PersistenceFailure { .. } => e,
                    other => RunTrackError::PersistenceFailure {
                        message: other.to_string(),
                    },
                };
                error!("[RunEngine] Failed to save run: {}", error);
                self.events.push(EngineEvent::SaveFailed(error.clone()));
                Err(error)
            }
        }
    }

    /// Discard the run without saving. No-op once completed or aborted.
    pub fn abort(&mut self) {
        if self.state().is_terminal() {
            debug!("[RunEngine] Ignoring abort while {}", self.state());
            return;
        }

        let discarded = self.session.as_ref().map_or(0, |s| s.samples.len());
        info!("[RunEngine] Run abandoned, discarding {} samples", discarded);

        self.teardown();
        self.session = None;
        self.completed = None;
        self.pending_confirmation = None;
        self.resting_state = RunState::Aborted;
        self.events.push(EngineEvent::Aborted(None));
    }

    // ========================================================================
    // Event Sources
    // ========================================================================

    /// Timer callback.
    ///
    /// Applies pending notification actions and location batches, checks the
    /// time target and refreshes the notification when it is due.
    pub fn tick(&mut self) {
        self.process_actions();
        self.process_locations();

        if !self.timers_running {
            return;
        }

        let now = self.clock.now_millis();
        self.check_auto_stop(now);
        if !self.timers_running {
            return;
        }

        let due = self
            .last_notification_millis
            .map_or(true, |last| now - last >= self.config.notification_refresh_millis);
        if due {
            self.push_notification(now);
        }
    }

    /// Apply location batches delivered since the last call.
    ///
    /// Batches only count while the run is active; anything else is a
    /// late delivery for a paused or finished run and is dropped.
    pub fn process_locations(&mut self) {
        for batch in self.stream.drain() {
            let now = self.clock.now_millis();

            if batch.sensor_gap {
                if self.state() == RunState::Active {
                    warn!(
                        "[RunEngine] {} ({:?})",
                        RunTrackError::TransientSensorGap,
                        batch.mode
                    );
                    self.events.push(EngineEvent::SensorGap(batch.mode));
                }
                continue;
            }

            if self.state() != RunState::Active {
                debug!(
                    "[RunEngine] Dropping {} samples delivered while {}",
                    batch.samples.len(),
                    self.state()
                );
                continue;
            }

            let delivered = batch.samples.len();
            let samples: Vec<LocationSample> =
                batch.samples.into_iter().filter(|s| s.is_valid()).collect();
            if samples.len() < delivered {
                warn!(
                    "[RunEngine] Dropped {} samples with invalid coordinates",
                    delivered - samples.len()
                );
            }
            if samples.is_empty() {
                continue;
            }

            if let Some(session) = self.session.as_mut() {
                session.append(&samples);
                debug!(
                    "[RunEngine] +{} samples ({:?}), {:.3} mi",
                    samples.len(),
                    batch.mode,
                    session.distance_miles()
                );
            }

            self.check_auto_stop(now);
        }
    }

    /// Apply action presses from the live notification.
    pub fn process_actions(&mut self) {
        let actions = match self.actions.as_ref() {
            Some(subscription) => subscription.drain(),
            None => return,
        };

        for action in actions {
            debug!("[RunEngine] Notification action {:?}", action);
            match action {
                NotificationAction::Pause => {
                    self.pause();
                }
                NotificationAction::Resume => {
                    self.resume();
                }
                NotificationAction::Stop => {
                    self.request_stop();
                }
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> RunState {
        self.session
            .as_ref()
            .map_or(self.resting_state, |session| session.state)
    }

    pub fn session(&self) -> Option<&RunSession> {
        self.session.as_ref()
    }

    /// Record awaiting a successful save.
    pub fn pending_run(&self) -> Option<&CompletedRun> {
        self.completed.as_ref()
    }

    pub fn pending_confirmation(&self) -> Option<Confirmation> {
        self.pending_confirmation
    }

    pub fn gps_interval(&self) -> GpsInterval {
        self.gps_interval
    }

    /// Take the lifecycle events emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take the handle of the weather lookup started after the last save.
    pub fn take_weather_task(&mut self) -> Option<WeatherTaskHandle> {
        self.weather_task.take()
    }

    /// Current notification content, if a run is live.
    pub fn notification_payload(&self) -> Option<NotificationPayload> {
        self.notification_payload_at(self.clock.now_millis())
    }

    /// Live metrics for display.
    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.state();
        let gps_interval_seconds = self.gps_interval.seconds();

        let session = match self.session.as_ref() {
            Some(session) => session,
            None => {
                return RunSnapshot {
                    state,
                    kind: None,
                    elapsed_seconds: 0,
                    distance_miles: 0.0,
                    pace: pace(0.0, 0),
                    remaining_seconds: None,
                    remaining_miles: None,
                    progress: 0.0,
                    sample_count: 0,
                    gps_interval_seconds,
                    is_paused: false,
                }
            }
        };

        let elapsed = session.elapsed_seconds(self.clock.now_millis());
        let distance = session.distance_miles();
        let config = session.config();

        let remaining_seconds = config
            .target_seconds()
            .map(|target| u64::from(target).saturating_sub(elapsed));
        let remaining_miles = config
            .target_miles()
            .map(|target| (target - distance).max(0.0));
        let progress = match (config.target_seconds(), config.target_miles()) {
            (Some(target), _) => (elapsed as f64 / f64::from(target)).min(1.0),
            (_, Some(target)) => (distance / target).min(1.0),
            _ => 0.0,
        };

        RunSnapshot {
            state,
            kind: Some(config.kind()),
            elapsed_seconds: elapsed,
            distance_miles: distance,
            pace: pace(distance, elapsed),
            remaining_seconds,
            remaining_miles,
            progress,
            sample_count: session.samples().len(),
            gps_interval_seconds,
            is_paused: state == RunState::Paused,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn request_confirmation(&mut self, confirmation: Confirmation) {
        debug!("[RunEngine] Awaiting {:?} confirmation", confirmation);
        self.pending_confirmation = Some(confirmation);
        self.events
            .push(EngineEvent::ConfirmationRequested(confirmation));
    }

    fn check_auto_stop(&mut self, now: i64) {
        let reason = match self
            .session
            .as_ref()
            .and_then(|session| session.auto_stop_reason(now))
        {
            Some(reason) => reason,
            None => return,
        };

        info!("[RunEngine] Auto-stopping: {:?}", reason);
        self.pending_confirmation = None;
        self.events.push(EngineEvent::AutoStopped(reason));
        if let Err(e) = self.finalize() {
            warn!("[RunEngine] Auto-stop saved nothing yet: {}", e);
        }
    }

    fn abort_start(&mut self, error: RunTrackError) -> RunTrackError {
        warn!("[RunEngine] Run could not start: {}", error);
        self.teardown();
        self.resting_state = RunState::Aborted;
        self.events.push(EngineEvent::Aborted(Some(error.clone())));
        error
    }

    fn notification_payload_at(&self, now: i64) -> Option<NotificationPayload> {
        let session = self.session.as_ref().filter(|s| s.state.is_running())?;
        let elapsed = session.elapsed_seconds(now);
        let distance = session.distance_miles();
        Some(project(
            distance,
            elapsed,
            &pace(distance, elapsed),
            session.state == RunState::Paused,
            session.config(),
        ))
    }

    fn push_notification(&mut self, now: i64) {
        let payload = match self.notification_payload_at(now) {
            Some(payload) => payload,
            None => return,
        };

        let id = &self.config.notification_id;
        let result = if self.notification_visible {
            self.notifications.update(id, &payload)
        } else {
            self.notifications.show(id, &payload)
        };

        match result {
            Ok(()) => self.notification_visible = true,
            Err(e) => warn!("[RunEngine] Notification not shown: {}", e),
        }
        self.last_notification_millis = Some(now);
    }

    fn spawn_weather(&mut self, run_id: RunId, run: &CompletedRun) {
        if !self.weather_enabled {
            return;
        }
        let service = match self.weather.clone() {
            Some(service) => service,
            None => return,
        };
        match run.last_sample() {
            Some(last) => {
                self.weather_task = Some(spawn_weather_task(
                    service,
                    run_id,
                    *last,
                    run.ended_at_millis,
                ));
            }
            None => debug!("[RunEngine] No samples, skipping weather for run {}", run_id),
        }
    }

    /// Stop timers, location updates and notification action routing, and
    /// dismiss the notification. Safe to call any number of times.
    fn teardown(&mut self) {
        self.timers_running = false;
        self.last_notification_millis = None;
        self.stream.unsubscribe_all();

        if self.actions.take().is_some() {
            self.notifications.release_actions();
        }

        if self.notification_visible {
            if let Err(e) = self.notifications.dismiss(&self.config.notification_id) {
                warn!("[RunEngine] Failed to dismiss notification: {}", e);
            }
            self.notification_visible = false;
        }
    }

    fn invalid(&self, operation: &'static str) -> RunTrackError {
        RunTrackError::InvalidState {
            state: self.state().to_string(),
            operation,
        }
    }
}

impl Drop for RunEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: i64) -> LocationSample {
        LocationSample::new(51.5074 + i as f64 * 0.001, -0.1278, i * 1000)
    }

    #[test]
    fn test_session_elapsed_excludes_pauses() {
        let mut session = RunSession::new(RunConfig::free(), 10_000, None);
        assert_eq!(session.elapsed_seconds(13_500), 3);

        session.begin_pause(13_500);
        // Frozen while paused
        assert_eq!(session.elapsed_seconds(60_000), 3);

        assert_eq!(session.end_pause(18_500), 5_000);
        assert_eq!(session.paused_accumulated_millis(), 5_000);
        assert_eq!(session.elapsed_seconds(20_500), 5);
        assert_eq!(session.state(), RunState::Active);
    }

    #[test]
    fn test_session_elapsed_never_negative() {
        let session = RunSession::new(RunConfig::free(), 10_000, None);
        assert_eq!(session.elapsed_seconds(5_000), 0);
    }

    #[test]
    fn test_session_distance_follows_samples() {
        let mut session = RunSession::new(RunConfig::free(), 0, Some(sample(0)));
        assert_eq!(session.distance_miles(), 0.0);

        session.append(&[sample(1), sample(2)]);
        let expected = total_distance(session.samples());
        assert_eq!(session.distance_miles(), expected);
        assert!(expected > 0.1);
    }

    #[test]
    fn test_auto_stop_reason() {
        let timed = RunSession::new(RunConfig::timed(10).unwrap(), 0, None);
        assert_eq!(timed.auto_stop_reason(9_999), None);
        assert_eq!(
            timed.auto_stop_reason(10_000),
            Some(AutoStopReason::TargetTimeReached)
        );

        let mut distance = RunSession::new(RunConfig::distance(0.1).unwrap(), 0, Some(sample(0)));
        assert_eq!(distance.auto_stop_reason(0), None);
        distance.append(&[sample(1), sample(2)]);
        assert_eq!(
            distance.auto_stop_reason(0),
            Some(AutoStopReason::TargetDistanceReached)
        );

        let free = RunSession::new(RunConfig::free(), 0, None);
        assert_eq!(free.auto_stop_reason(i64::MAX / 2), None);
    }

    #[test]
    fn test_paused_session_never_auto_stops() {
        let mut timed = RunSession::new(RunConfig::timed(10).unwrap(), 0, None);
        timed.begin_pause(5_000);
        assert_eq!(timed.auto_stop_reason(60_000), None);
    }

    #[test]
    fn test_complete_freezes_metrics() {
        let mut session = RunSession::new(RunConfig::free(), 1_000, Some(sample(0)));
        session.append(&[sample(1)]);
        let run = session.complete(61_000);

        assert_eq!(run.started_at_millis, 1_000);
        assert_eq!(run.ended_at_millis, 61_000);
        assert_eq!(run.elapsed_seconds, 60);
        assert_eq!(run.samples.len(), 2);
        assert_eq!(run.total_distance_miles, session.distance_miles());
    }

    #[test]
    fn test_state_helpers() {
        assert!(RunState::Paused.is_running());
        assert!(!RunState::Finalizing.is_running());
        assert!(RunState::Aborted.is_terminal());
        assert_eq!(RunState::Finalizing.to_string(), "Finalizing");
    }
}
