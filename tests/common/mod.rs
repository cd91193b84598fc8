//! Fake collaborators for driving `RunEngine` in integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use run_tracker::{
    ActionDispatcher, BatchDelivery, CompletedRun, EngineConfig, GpsInterval, LocationProvider,
    LocationSample, ManualClock, NotificationPayload, NotificationSink, PermissionStatus, Result,
    RunEngine, RunId, RunStore, RunTrackError, Settings, TrackingMode, WeatherService,
};

/// Start of simulated time: 2024-01-15T08:00:00Z
pub const T0: i64 = 1_705_305_600_000;

/// Point `i` of a straight northbound path, ~0.069 mi between points.
pub fn path(i: i64) -> LocationSample {
    LocationSample::new(40.0 + i as f64 * 0.001, -105.0, T0 + i * 1000)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Location provider
// ============================================================================

#[derive(Default)]
pub struct ProviderState {
    pub deny_foreground: bool,
    pub deny_background: bool,
    pub start_error: Option<RunTrackError>,
    pub initial_fix: Option<LocationSample>,
    pub deliveries: HashMap<TrackingMode, BatchDelivery>,
    pub start_calls: u32,
    pub stop_calls: u32,
}

#[derive(Clone, Default)]
pub struct FakeProvider(pub Arc<Mutex<ProviderState>>);

impl FakeProvider {
    pub fn state(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.0.lock().unwrap()
    }

    /// The delivery handle handed out by the latest subscribe for `mode`.
    pub fn delivery(&self, mode: TrackingMode) -> Option<BatchDelivery> {
        self.state().deliveries.get(&mode).cloned()
    }

    pub fn deliver(&self, mode: TrackingMode, samples: Vec<LocationSample>) -> bool {
        match self.delivery(mode) {
            Some(delivery) => delivery.deliver(samples),
            None => false,
        }
    }
}

impl LocationProvider for FakeProvider {
    fn request_foreground_permission(&mut self) -> PermissionStatus {
        if self.state().deny_foreground {
            PermissionStatus::Denied
        } else {
            PermissionStatus::Granted
        }
    }

    fn request_background_permission(&mut self) -> PermissionStatus {
        if self.state().deny_background {
            PermissionStatus::Denied
        } else {
            PermissionStatus::Granted
        }
    }

    fn current_location(&mut self) -> Result<Option<LocationSample>> {
        Ok(self.state().initial_fix)
    }

    fn start_updates(
        &mut self,
        mode: TrackingMode,
        _interval: GpsInterval,
        delivery: BatchDelivery,
    ) -> Result<()> {
        let mut state = self.state();
        state.start_calls += 1;
        match state.start_error.clone() {
            // Registered without a fix yet; samples arrive through `delivery` later
            Some(RunTrackError::TransientSensorGap) => {
                state.deliveries.insert(mode, delivery);
                Err(RunTrackError::TransientSensorGap)
            }
            Some(e) => Err(e),
            None => {
                state.deliveries.insert(mode, delivery);
                Ok(())
            }
        }
    }

    fn stop_updates(&mut self, _mode: TrackingMode) {
        self.state().stop_calls += 1;
    }
}

// ============================================================================
// Notification sink
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOp {
    Show,
    Update,
    Dismiss,
}

#[derive(Default)]
pub struct SinkState {
    pub payloads: Vec<NotificationPayload>,
    /// Every show/update/dismiss in call order, with the id it targeted
    pub ops: Vec<(SinkOp, String)>,
    pub dismissed: u32,
    pub dispatcher: Option<ActionDispatcher>,
    pub released: u32,
    pub deny_permission: bool,
    pub permission_requests: u32,
}

#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<SinkState>>);

impl RecordingSink {
    pub fn state(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.0.lock().unwrap()
    }

    pub fn shown(&self) -> usize {
        self.state().payloads.len()
    }

    pub fn last(&self) -> Option<NotificationPayload> {
        self.state().payloads.last().cloned()
    }

    pub fn ops(&self) -> Vec<(SinkOp, String)> {
        self.state().ops.clone()
    }

    /// Simulate pressing a notification action button.
    pub fn press(&self, identifier: &str) -> bool {
        let dispatcher = self.state().dispatcher.clone();
        dispatcher.map_or(false, |d| d.dispatch_identifier(identifier))
    }
}

impl NotificationSink for RecordingSink {
    fn request_permission(&mut self) -> PermissionStatus {
        let mut state = self.state();
        state.permission_requests += 1;
        if state.deny_permission {
            PermissionStatus::Denied
        } else {
            PermissionStatus::Granted
        }
    }

    fn show(&mut self, notification_id: &str, payload: &NotificationPayload) -> Result<()> {
        let mut state = self.state();
        state.payloads.push(payload.clone());
        state.ops.push((SinkOp::Show, notification_id.to_string()));
        Ok(())
    }

    fn update(&mut self, notification_id: &str, payload: &NotificationPayload) -> Result<()> {
        let mut state = self.state();
        state.payloads.push(payload.clone());
        state.ops.push((SinkOp::Update, notification_id.to_string()));
        Ok(())
    }

    fn dismiss(&mut self, notification_id: &str) -> Result<()> {
        let mut state = self.state();
        state.dismissed += 1;
        state.ops.push((SinkOp::Dismiss, notification_id.to_string()));
        Ok(())
    }

    fn register_actions(&mut self, dispatcher: ActionDispatcher) {
        self.state().dispatcher = Some(dispatcher);
    }

    fn release_actions(&mut self) {
        self.state().released += 1;
    }
}

// ============================================================================
// Run store
// ============================================================================

#[derive(Default)]
pub struct StoreState {
    pub fail: bool,
    pub attempts: u32,
    pub saved: Vec<CompletedRun>,
    pub attempted: Vec<CompletedRun>,
}

#[derive(Clone, Default)]
pub struct FlakyStore(pub Arc<Mutex<StoreState>>);

impl FlakyStore {
    pub fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.0.lock().unwrap()
    }

    pub fn set_failing(&self, fail: bool) {
        self.state().fail = fail;
    }

    pub fn saved(&self) -> Vec<CompletedRun> {
        self.state().saved.clone()
    }
}

impl RunStore for FlakyStore {
    fn save_completed_run(&mut self, run: &CompletedRun) -> Result<RunId> {
        let mut state = self.state();
        state.attempts += 1;
        state.attempted.push(run.clone());
        if state.fail {
            return Err(RunTrackError::PersistenceFailure {
                message: "disk full".to_string(),
            });
        }
        state.saved.push(run.clone());
        Ok(state.saved.len() as RunId)
    }
}

// ============================================================================
// Weather
// ============================================================================

#[derive(Clone, Default)]
pub struct RecordingWeather {
    pub calls: Arc<Mutex<Vec<(RunId, LocationSample, i64)>>>,
    pub fail: bool,
}

impl WeatherService for RecordingWeather {
    fn fetch_and_attach(
        &self,
        run_id: RunId,
        coordinate: &LocationSample,
        ended_at_millis: i64,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((run_id, *coordinate, ended_at_millis));
        if self.fail {
            Err(RunTrackError::WeatherFetchFailure {
                message: "offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: RunEngine,
    pub clock: ManualClock,
    pub provider: FakeProvider,
    pub sink: RecordingSink,
    pub store: FlakyStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Settings::default(), None)
    }

    pub fn build(settings: Settings, weather: Option<Arc<dyn WeatherService>>) -> Self {
        Self::with_config(settings, weather, EngineConfig::default())
    }

    pub fn with_config(
        settings: Settings,
        weather: Option<Arc<dyn WeatherService>>,
        config: EngineConfig,
    ) -> Self {
        init_logger();

        let clock = ManualClock::new(T0);
        let provider = FakeProvider::default();
        let sink = RecordingSink::default();
        let store = FlakyStore::default();

        let mut engine = RunEngine::new(
            Box::new(provider.clone()),
            Box::new(sink.clone()),
            Box::new(store.clone()),
            Box::new(settings),
        )
        .with_config(config)
        .with_clock(Arc::new(clock.clone()));
        if let Some(weather) = weather {
            engine = engine.with_weather(weather);
        }

        Self {
            engine,
            clock,
            provider,
            sink,
            store,
        }
    }

    /// Advance the clock one second at a time, ticking after each step.
    pub fn run_for(&mut self, seconds: i64) {
        for _ in 0..seconds {
            self.clock.advance_secs(1);
            self.engine.tick();
        }
    }
}
