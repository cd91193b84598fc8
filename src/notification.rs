//! Live run notification.
//!
//! [`project`] turns engine-observable state into a platform independent
//! payload; a [`NotificationSink`] renders it. Action buttons on the
//! notification (pause/resume/stop) come back through an
//! [`ActionSubscription`] owned by the engine for the lifetime of one run.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::geo_utils::{format_distance, format_duration, miles_to_meters};
use crate::{PermissionStatus, Result, RunConfig, RunKind};

/// Fixed identity of the live run notification.
pub const RUN_NOTIFICATION_ID: &str = "active-run-notification";

/// Bounded progress shown on timed and distance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct NotificationProgress {
    pub current: u64,
    pub max: u64,
}

/// Content of the live run notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub is_paused: bool,
    /// Seconds for timed runs, meters for distance runs, absent for free runs
    pub progress: Option<NotificationProgress>,
}

/// Build the notification payload for the current run state.
///
/// Pure: safe to call at any point for periodic refreshes as well as the
/// initial display.
pub fn project(
    distance_miles: f64,
    elapsed_seconds: u64,
    pace: &str,
    is_paused: bool,
    config: &RunConfig,
) -> NotificationPayload {
    let title = if is_paused { "Run Paused" } else { "Run Active" };
    let body = format!(
        "{} • {} • {}/mi",
        format_distance(distance_miles),
        format_duration(elapsed_seconds),
        pace
    );

    let progress = match config.kind() {
        RunKind::Timed => config.target_seconds().map(|target| NotificationProgress {
            current: elapsed_seconds,
            max: u64::from(target),
        }),
        RunKind::Distance => config.target_miles().map(|target| NotificationProgress {
            current: meters_rounded(distance_miles),
            max: meters_rounded(target),
        }),
        RunKind::Free => None,
    };

    NotificationPayload {
        title: title.to_string(),
        body,
        is_paused,
        progress,
    }
}

fn meters_rounded(miles: f64) -> u64 {
    miles_to_meters(miles).round().max(0.0) as u64
}

/// Action button pressed on the live notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationAction {
    Pause,
    Resume,
    Stop,
}

impl NotificationAction {
    /// Category action identifier.
    pub fn identifier(&self) -> &'static str {
        match self {
            NotificationAction::Pause => "pause-run",
            NotificationAction::Resume => "resume-run",
            NotificationAction::Stop => "stop-run",
        }
    }

    /// Parse either the category identifier (`pause-run`) or the short form
    /// some native modules emit (`pause`).
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "pause-run" | "pause" => Some(NotificationAction::Pause),
            "resume-run" | "resume" => Some(NotificationAction::Resume),
            "stop-run" | "stop" => Some(NotificationAction::Stop),
            _ => None,
        }
    }
}

/// Handle given to a sink so platform callbacks can report action presses.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    sender: Sender<NotificationAction>,
}

impl ActionDispatcher {
    /// Forward an action. Returns false once the run has released its subscription.
    pub fn dispatch(&self, action: NotificationAction) -> bool {
        self.sender.send(action).is_ok()
    }

    /// Forward a raw platform identifier; unknown identifiers (e.g. tapping
    /// the notification body) are ignored.
    pub fn dispatch_identifier(&self, identifier: &str) -> bool {
        match NotificationAction::from_identifier(identifier) {
            Some(action) => self.dispatch(action),
            None => false,
        }
    }
}

/// Receiving end of notification actions for one run.
///
/// Dropping it releases the subscription; later dispatches fail quietly.
#[derive(Debug)]
pub struct ActionSubscription {
    receiver: Receiver<NotificationAction>,
}

impl ActionSubscription {
    pub fn new() -> (Self, ActionDispatcher) {
        let (sender, receiver) = mpsc::channel();
        (Self { receiver }, ActionDispatcher { sender })
    }

    /// Take every pending action in press order.
    pub fn drain(&self) -> Vec<NotificationAction> {
        self.receiver.try_iter().collect()
    }
}

/// Platform renderer for the live run notification.
pub trait NotificationSink: Send {
    /// Ask to post notifications. Platforms without a prompt report granted.
    ///
    /// A denial is not fatal; the run proceeds without a visible notification.
    fn request_permission(&mut self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    /// Show the notification, replacing any content with the same id.
    fn show(&mut self, notification_id: &str, payload: &NotificationPayload) -> Result<()>;

    /// Replace the content of a visible notification.
    fn update(&mut self, notification_id: &str, payload: &NotificationPayload) -> Result<()> {
        self.show(notification_id, payload)
    }

    /// Remove the notification. Must tolerate ids that are not showing.
    fn dismiss(&mut self, notification_id: &str) -> Result<()>;

    /// Start routing action presses to `dispatcher`.
    fn register_actions(&mut self, _dispatcher: ActionDispatcher) {}

    /// Stop routing action presses.
    fn release_actions(&mut self) {}
}
