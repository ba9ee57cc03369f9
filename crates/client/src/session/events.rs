//! Session states and the events reported while a transfer runs.

use std::fmt;
use std::sync::{Arc, Mutex};

/// State of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No bus connection.
    Disconnected,
    /// Connected to the gateway.
    BusConnected,
    /// Device session bound, package size negotiated.
    DeviceBound,
    /// Protocol version of the device known.
    VersionChecked,
    /// Firmware accepted by the compatibility check.
    CompatibilityChecked,
    /// Start chunk decided.
    Planned,
    /// Chunks are being sent.
    Uploading,
    /// Remote CRC matches the local stream.
    Verified,
    /// Device told to activate the firmware.
    Restarted,
    /// The session ended with an error or was aborted.
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::BusConnected => "bus connected",
            Self::DeviceBound => "device bound",
            Self::VersionChecked => "version checked",
            Self::CompatibilityChecked => "compatibility checked",
            Self::Planned => "planned",
            Self::Uploading => "uploading",
            Self::Verified => "verified",
            Self::Restarted => "restarted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events emitted by a transfer session, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Session state changed.
    StateChanged(TransferState),
    /// The device accepts smaller packages than requested.
    PackageSizeReduced { requested: usize, negotiated: usize },
    /// Informational message for the user.
    Info(String),
    /// Something was skipped or degraded.
    Warning(String),
    /// Upload progress.
    Progress {
        percent: u8,
        bytes_per_sec: u64,
        secs_left: u64,
    },
    /// The session failed.
    Error(String),
}

/// Receives the events of a session.
///
/// Events are delivered synchronously from the session's own task.
pub trait TransferObserver {
    fn on_event(&mut self, event: &TransferEvent);
}

/// Observer that keeps every event, for inspection after a run.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<TransferEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The state changes received so far.
    pub fn states(&self) -> Vec<TransferState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransferEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }
}

impl TransferObserver for RecordingObserver {
    fn on_event(&mut self, event: &TransferEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}
