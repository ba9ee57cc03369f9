//! Compatibility check between a firmware and the application on a device.
//!
//! Flashing a firmware built for another application turns the device into
//! a new device that has to be set up from scratch, and flashing an older
//! version forces a full reprogramming. Both need an explicit yes from the
//! user; a strictly newer firmware passes silently.

use std::fmt;

use protocol::ApplicationIdentity;
use tracing::{debug, info};

use crate::ui::Confirm;

/// Which part of the identity makes the firmware a different application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewDeviceReason {
    /// Different OpenKNX id.
    OpenKnxId,
    /// Same OpenKNX id, different application number.
    AppNumber,
}

/// How a firmware relates to the application running on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The firmware carries another application.
    NewDevice(NewDeviceReason),
    /// Same application version and revision.
    Identical,
    /// The device runs a newer version.
    Downgrade,
    /// The firmware is newer.
    Upgrade,
}

impl Classification {
    /// Returns `true` if the update must be confirmed by the user.
    pub fn needs_confirmation(self) -> bool {
        self != Self::Upgrade
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewDevice(NewDeviceReason::OpenKnxId) => write!(
                f,
                "the OpenKNX id of the firmware differs from the device; flashing creates a new \
                 device (address 15.15.255) that must be set up again in ETS"
            ),
            Self::NewDevice(NewDeviceReason::AppNumber) => write!(
                f,
                "the application number of the firmware differs from the device; flashing creates \
                 a new device (address 15.15.255) that must be set up again in ETS"
            ),
            Self::Identical => write!(f, "device and firmware carry the same application version"),
            Self::Downgrade => write!(
                f,
                "the device runs a newer application version; this is a downgrade and the device \
                 must be reprogrammed in ETS (its address is kept)"
            ),
            Self::Upgrade => write!(f, "the firmware is newer than the application on the device"),
        }
    }
}

/// Whether the update goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Continue,
    Abort,
}

/// Classify `firmware` against the application on the device.
pub fn classify(firmware: &ApplicationIdentity, device: &ApplicationIdentity) -> Classification {
    if firmware.open_knx_id != device.open_knx_id {
        return Classification::NewDevice(NewDeviceReason::OpenKnxId);
    }
    if firmware.app_number != device.app_number {
        return Classification::NewDevice(NewDeviceReason::AppNumber);
    }
    if firmware.app_version == device.app_version {
        if firmware.app_revision == device.app_revision {
            return Classification::Identical;
        }
        if firmware.app_revision < device.app_revision {
            return Classification::Downgrade;
        }
    } else if firmware.app_version < device.app_version {
        // An older version is a downgrade whatever the revisions are.
        return Classification::Downgrade;
    }
    Classification::Upgrade
}

/// Classify and ask for confirmation where needed.
pub fn check<C: Confirm + ?Sized>(
    firmware: &ApplicationIdentity,
    device: &ApplicationIdentity,
    confirm: &mut C,
) -> (Classification, GateDecision) {
    let classification = classify(firmware, device);
    debug!(%firmware, %device, ?classification, "Compatibility classified");

    if !classification.needs_confirmation() {
        return (classification, GateDecision::Continue);
    }

    let question = format!("{classification}. Update anyway?");
    if confirm.confirm(&question) {
        info!(?classification, "Update confirmed by user");
        (classification, GateDecision::Continue)
    } else {
        info!(?classification, "Update declined by user");
        (classification, GateDecision::Abort)
    }
}
