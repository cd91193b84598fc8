//! # Location Stream Adapter
//!
//! Merges platform foreground and background location updates into one
//! append-only stream of sample batches for the engine.
//!
//! Platforms implement [`LocationProvider`]. Whenever they acquire fixes
//! (a polling timer, an OS push, a background task woken while the screen is
//! locked) they hand them to the [`BatchDelivery`] they were given when the
//! subscription started. Deliveries are tagged with their subscription, so
//! batches that arrive after an unsubscribe are dropped on the consumer side
//! instead of leaking into a paused or finished run.

use std::sync::mpsc::{self, Receiver, Sender};

use log::{debug, info, warn};

use crate::{GpsInterval, LocationSample, PermissionScope, Result, RunTrackError};

/// Identifier of one subscription; a new one is issued on every subscribe.
pub type SubscriptionId = u64;

/// Where the platform tracks location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingMode {
    /// While the app is visible
    Foreground,
    /// While the app is backgrounded or the screen is locked
    Background,
}

/// Outcome of a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// One delivery from the platform. Batches may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationBatch {
    pub subscription: SubscriptionId,
    pub mode: TrackingMode,
    pub samples: Vec<LocationSample>,
    /// The sensor was unavailable for this tick
    pub sensor_gap: bool,
}

/// Handle a platform uses to push samples into the stream.
///
/// Cheap to clone and safe to use from any thread.
#[derive(Debug, Clone)]
pub struct BatchDelivery {
    subscription: SubscriptionId,
    mode: TrackingMode,
    sender: Sender<LocationBatch>,
}

impl BatchDelivery {
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Deliver a batch of samples in acquisition order.
    ///
    /// Returns false once the stream has been dropped.
    pub fn deliver(&self, samples: Vec<LocationSample>) -> bool {
        self.send(samples, false)
    }

    /// Report a tick in which the sensor produced nothing.
    pub fn report_sensor_gap(&self) -> bool {
        self.send(Vec::new(), true)
    }

    fn send(&self, samples: Vec<LocationSample>, sensor_gap: bool) -> bool {
        self.sender
            .send(LocationBatch {
                subscription: self.subscription,
                mode: self.mode,
                samples,
                sensor_gap,
            })
            .is_ok()
    }
}

/// Platform location services.
pub trait LocationProvider: Send {
    fn request_foreground_permission(&mut self) -> PermissionStatus;

    fn request_background_permission(&mut self) -> PermissionStatus;

    /// A single high-accuracy fix, if one can be obtained.
    fn current_location(&mut self) -> Result<Option<LocationSample>>;

    /// Begin delivering updates for `mode` through `delivery`.
    ///
    /// Return `TransientSensorGap` when updates are registered but no fix is
    /// available yet. The provider must keep `delivery` in that case and use it
    /// once samples arrive; any other error means nothing was registered.
    fn start_updates(
        &mut self,
        mode: TrackingMode,
        interval: GpsInterval,
        delivery: BatchDelivery,
    ) -> Result<()>;

    /// Stop delivering updates for `mode`. Must tolerate repeated calls.
    fn stop_updates(&mut self, mode: TrackingMode);
}

/// Idempotent subscription manager over a [`LocationProvider`].
pub struct LocationStream {
    provider: Box<dyn LocationProvider>,
    sender: Sender<LocationBatch>,
    receiver: Receiver<LocationBatch>,
    foreground: Option<SubscriptionId>,
    background: Option<SubscriptionId>,
    next_subscription: SubscriptionId,
}

impl LocationStream {
    pub fn new(provider: Box<dyn LocationProvider>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            provider,
            sender,
            receiver,
            foreground: None,
            background: None,
            next_subscription: 1,
        }
    }

    /// Request foreground then background permission.
    ///
    /// Background is only requested once foreground has been granted; both
    /// are required to track through screen lock.
    pub fn request_permissions(&mut self) -> Result<()> {
        debug!("[LocationStream] Requesting foreground permission");
        if self.provider.request_foreground_permission() != PermissionStatus::Granted {
            return Err(RunTrackError::PermissionDenied {
                scope: PermissionScope::Foreground,
            });
        }
        debug!("[LocationStream] Requesting background permission");
        if self.provider.request_background_permission() != PermissionStatus::Granted {
            return Err(RunTrackError::PermissionDenied {
                scope: PermissionScope::Background,
            });
        }
        Ok(())
    }

    /// Current position, or None if the platform could not produce one.
    pub fn current_location(&mut self) -> Option<LocationSample> {
        match self.provider.current_location() {
            Ok(Some(sample)) if sample.is_valid() => Some(sample),
            Ok(Some(sample)) => {
                warn!("[LocationStream] Discarding invalid initial fix {:?}", sample);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("[LocationStream] Initial fix unavailable: {}", e);
                None
            }
        }
    }

    /// Subscribe to updates for `mode`.
    ///
    /// Subscribing while already subscribed is a successful no-op that returns
    /// the existing subscription.
    pub fn subscribe(&mut self, mode: TrackingMode, interval: GpsInterval) -> Result<SubscriptionId> {
        if let Some(existing) = *self.slot(mode) {
            debug!(
                "[LocationStream] {:?} already subscribed ({})",
                mode, existing
            );
            return Ok(existing);
        }

        let subscription = self.next_subscription;
        self.next_subscription += 1;

        let delivery = BatchDelivery {
            subscription,
            mode,
            sender: self.sender.clone(),
        };

        match self.provider.start_updates(mode, interval, delivery.clone()) {
            Ok(()) => {}
            // The stream stays up through a sensor gap; the gap is queued so the
            // consumer sees it on its next drain.
            Err(RunTrackError::TransientSensorGap) => {
                warn!(
                    "[LocationStream] {:?} started without a sensor fix, waiting for samples",
                    mode
                );
                delivery.report_sensor_gap();
            }
            Err(e @ RunTrackError::PermissionDenied { .. }) => return Err(e),
            Err(e) => {
                return Err(RunTrackError::TrackingStartFailure {
                    message: format!("{:?} tracking: {}", mode, e),
                })
            }
        }

        *self.slot(mode) = Some(subscription);
        info!(
            "[LocationStream] Subscribed {:?} ({}) every {}s",
            mode,
            subscription,
            interval.seconds()
        );
        Ok(subscription)
    }

    /// Stop updates for `mode`. Safe to call when not subscribed.
    pub fn unsubscribe(&mut self, mode: TrackingMode) {
        if let Some(subscription) = self.slot(mode).take() {
            self.provider.stop_updates(mode);
            info!("[LocationStream] Unsubscribed {:?} ({})", mode, subscription);
        }
    }

    /// Stop all updates. Safe to call repeatedly.
    pub fn unsubscribe_all(&mut self) {
        self.unsubscribe(TrackingMode::Foreground);
        self.unsubscribe(TrackingMode::Background);
    }

    pub fn is_subscribed(&self, mode: TrackingMode) -> bool {
        match mode {
            TrackingMode::Foreground => self.foreground.is_some(),
            TrackingMode::Background => self.background.is_some(),
        }
    }

    /// Take every batch delivered so far, in delivery order.
    ///
    /// Batches from subscriptions that are no longer active are dropped.
    pub fn drain(&mut self) -> Vec<LocationBatch> {
        let mut batches = Vec::new();
        while let Ok(batch) = self.receiver.try_recv() {
            let active = match batch.mode {
                TrackingMode::Foreground => self.foreground,
                TrackingMode::Background => self.background,
            };
            if active == Some(batch.subscription) {
                batches.push(batch);
            } else {
                debug!(
                    "[LocationStream] Dropping {} samples from stale subscription {}",
                    batch.samples.len(),
                    batch.subscription
                );
            }
        }
        batches
    }

    fn slot(&mut self, mode: TrackingMode) -> &mut Option<SubscriptionId> {
        match mode {
            TrackingMode::Foreground => &mut self.foreground,
            TrackingMode::Background => &mut self.background,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ProviderState {
        deny_background: bool,
        start_error: Option<RunTrackError>,
        deliveries: HashMap<TrackingMode, BatchDelivery>,
        start_calls: u32,
        stop_calls: u32,
    }

    #[derive(Clone, Default)]
    struct TestProvider(Arc<Mutex<ProviderState>>);

    impl LocationProvider for TestProvider {
        fn request_foreground_permission(&mut self) -> PermissionStatus {
            PermissionStatus::Granted
        }

        fn request_background_permission(&mut self) -> PermissionStatus {
            if self.0.lock().unwrap().deny_background {
                PermissionStatus::Denied
            } else {
                PermissionStatus::Granted
            }
        }

        fn current_location(&mut self) -> Result<Option<LocationSample>> {
            Ok(Some(LocationSample::new(95.0, 0.0, 0)))
        }

        fn start_updates(
            &mut self,
            mode: TrackingMode,
            _interval: GpsInterval,
            delivery: BatchDelivery,
        ) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            state.start_calls += 1;
            match state.start_error.clone() {
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
            self.0.lock().unwrap().stop_calls += 1;
        }
    }

    fn sample(i: i64) -> LocationSample {
        LocationSample::new(51.5 + i as f64 * 0.001, -0.12, i * 1000)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let provider = TestProvider::default();
        let mut stream = LocationStream::new(Box::new(provider.clone()));

        let first = stream
            .subscribe(TrackingMode::Background, GpsInterval::default())
            .unwrap();
        let second = stream
            .subscribe(TrackingMode::Background, GpsInterval::default())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.0.lock().unwrap().start_calls, 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let provider = TestProvider::default();
        let mut stream = LocationStream::new(Box::new(provider.clone()));
        stream
            .subscribe(TrackingMode::Foreground, GpsInterval::default())
            .unwrap();

        stream.unsubscribe_all();
        stream.unsubscribe_all();
        stream.unsubscribe(TrackingMode::Foreground);

        assert_eq!(provider.0.lock().unwrap().stop_calls, 1);
        assert!(!stream.is_subscribed(TrackingMode::Foreground));
    }

    #[test]
    fn test_drain_keeps_delivery_order_and_drops_stale_batches() {
        let provider = TestProvider::default();
        let mut stream = LocationStream::new(Box::new(provider.clone()));
        stream
            .subscribe(TrackingMode::Foreground, GpsInterval::default())
            .unwrap();

        let old = provider.0.lock().unwrap().deliveries[&TrackingMode::Foreground].clone();
        old.deliver(vec![sample(2), sample(1)]);
        old.deliver(vec![]);

        let batches = stream.drain();
        assert_eq!(batches.len(), 2);
        // Arrival order is preserved even when timestamps go backwards
        assert_eq!(batches[0].samples, vec![sample(2), sample(1)]);
        assert!(batches[1].samples.is_empty());

        stream.unsubscribe(TrackingMode::Foreground);
        stream
            .subscribe(TrackingMode::Foreground, GpsInterval::default())
            .unwrap();
        assert!(old.deliver(vec![sample(3)]));
        assert!(stream.drain().is_empty());
    }

    #[test]
    fn test_background_permission_denied() {
        let provider = TestProvider::default();
        provider.0.lock().unwrap().deny_background = true;
        let mut stream = LocationStream::new(Box::new(provider));

        assert_eq!(
            stream.request_permissions(),
            Err(RunTrackError::PermissionDenied {
                scope: PermissionScope::Background
            })
        );
    }

    #[test]
    fn test_start_failure_is_mapped() {
        let provider = TestProvider::default();
        provider.0.lock().unwrap().start_error = Some(RunTrackError::ConfigError {
            message: "gps off".to_string(),
        });
        let mut stream = LocationStream::new(Box::new(provider));

        let result = stream.subscribe(TrackingMode::Foreground, GpsInterval::default());
        assert!(matches!(
            result,
            Err(RunTrackError::TrackingStartFailure { .. })
        ));
        assert!(!stream.is_subscribed(TrackingMode::Foreground));
    }

    #[test]
    fn test_sensor_gap_keeps_subscription() {
        let provider = TestProvider::default();
        provider.0.lock().unwrap().start_error = Some(RunTrackError::TransientSensorGap);
        let mut stream = LocationStream::new(Box::new(provider.clone()));

        let subscription = stream
            .subscribe(TrackingMode::Foreground, GpsInterval::default())
            .unwrap();
        assert!(stream.is_subscribed(TrackingMode::Foreground));

        // The gap is reported on the new subscription before any samples
        let batches = stream.drain();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].sensor_gap);
        assert_eq!(batches[0].subscription, subscription);

        let delivery = provider.0.lock().unwrap().deliveries[&TrackingMode::Foreground].clone();
        delivery.deliver(vec![sample(1)]);
        let batches = stream.drain();
        assert_eq!(batches.len(), 1);
        assert!(!batches[0].sensor_gap);
        assert_eq!(batches[0].samples, vec![sample(1)]);
    }

    #[test]
    fn test_invalid_initial_fix_is_discarded() {
        let mut stream = LocationStream::new(Box::new(TestProvider::default()));
        assert_eq!(stream.current_location(), None);
    }
}
