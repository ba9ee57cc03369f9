//! Local file handling for transfers to the device.
//!
//! This module provides:
//! - Conversion of `.bin`, `.gz` and `.uf2` inputs into the transfer stream
//! - Planning where an interrupted upload continues

pub mod normalize;
pub mod resume;

pub use normalize::{normalize, normalize_bytes, InputFormat, NormalizedStream};
pub use resume::{ResumePlanner, TransferPlan, COMMIT_GRACE_PERIOD};
