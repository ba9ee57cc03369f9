//! Planning where an interrupted upload continues.
//!
//! The device keeps whatever it acknowledged before a transfer broke off.
//! Before uploading again, the planner compares the CRC32 the device reports
//! for the stored prefix with the CRC32 of the same prefix of the local
//! stream. Only an exact match lets the transfer skip the chunks already
//! stored; anything else starts over at the first data chunk.
//!
//! Resuming is an optimization. Every failure while querying the device
//! degrades to a fresh transfer instead of an error.

use std::time::Duration;

use protocol::{crc32, ChunkLayout, FileTransferService, ProtocolVersion, FIRST_DATA_SEQUENCE};
use tracing::{debug, info, warn};

/// Time a device may report an empty file while it still commits the
/// previous transfer to flash.
pub const COMMIT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Where a transfer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// First data chunk to send.
    pub start_sequence: u32,
    /// The device already holds the complete stream.
    pub already_complete: bool,
}

impl TransferPlan {
    /// Send everything from the first data chunk.
    pub const FRESH: TransferPlan = TransferPlan {
        start_sequence: FIRST_DATA_SEQUENCE,
        already_complete: false,
    };

    /// Nothing left to send.
    pub fn complete(start_sequence: u32) -> Self {
        Self {
            start_sequence,
            already_complete: true,
        }
    }

    /// Returns `true` if chunks before the start are skipped.
    pub fn is_resumed(&self) -> bool {
        self.start_sequence > FIRST_DATA_SEQUENCE
    }
}

/// Computes transfer plans from remote file metadata.
#[derive(Debug, Clone)]
pub struct ResumePlanner {
    grace_period: Duration,
}

impl Default for ResumePlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumePlanner {
    pub fn new() -> Self {
        Self {
            grace_period: COMMIT_GRACE_PERIOD,
        }
    }

    /// Use a different wait for devices that report empty files while committing.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Plan the upload of `local` to `target`.
    ///
    /// `local` must be in the encoding that is transferred, so for firmware
    /// the normalized stream rather than the input file. Call this only for
    /// devices that support resuming; others always start with
    /// [`TransferPlan::FRESH`].
    pub async fn plan<S: FileTransferService>(
        &self,
        service: &mut S,
        local: &[u8],
        target: &str,
        package_size: usize,
        version: ProtocolVersion,
    ) -> TransferPlan {
        let mut remote = match service.file_info(target).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(target, error = %e, "Remote file info unavailable, starting fresh");
                return TransferPlan::FRESH;
            }
        };

        if remote.size == 0 && version.reports_empty_while_committing() {
            info!(
                target,
                wait_secs = self.grace_period.as_secs(),
                "Remote file reported empty, waiting for the device to finish writing"
            );
            tokio::time::sleep(self.grace_period).await;
            remote = match service.file_info(target).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(target, error = %e, "Remote file info unavailable, starting fresh");
                    return TransferPlan::FRESH;
                }
            };
        }

        if remote.size == 0 {
            debug!(target, "Remote file empty, starting fresh");
            return TransferPlan::FRESH;
        }

        let local_size = local.len() as u64;
        let Some(local_crc) = usize::try_from(remote.size)
            .ok()
            .and_then(|len| local.get(..len))
            .map(crc32)
        else {
            warn!(
                target,
                remote_size = remote.size,
                local_size,
                "Remote file larger than local stream, starting fresh"
            );
            return TransferPlan::FRESH;
        };

        if local_crc != remote.crc32 {
            info!(
                target,
                local_crc,
                remote_crc = remote.crc32,
                "Remote content differs, starting fresh"
            );
            return TransferPlan::FRESH;
        }

        let layout = match ChunkLayout::new(package_size, version) {
            Ok(layout) => layout,
            Err(e) => {
                warn!(error = %e, "Cannot lay out chunks, starting fresh");
                return TransferPlan::FRESH;
            }
        };
        let start_sequence = layout.resume_sequence(remote.size);

        if remote.size == local_size {
            info!(target, size = remote.size, "Remote file already complete");
            return TransferPlan::complete(start_sequence);
        }

        info!(
            target,
            stored = remote.size,
            total = local_size,
            start_sequence,
            "Resuming transfer"
        );
        TransferPlan {
            start_sequence,
            already_complete: false,
        }
    }
}
