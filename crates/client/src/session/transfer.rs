//! The transfer session: connection handling, uploads and firmware updates.
//!
//! A firmware update walks through these states:
//!
//! ```text
//! Disconnected → BusConnected → DeviceBound → VersionChecked
//!     → [CompatibilityChecked] → Planned → Uploading → Verified → Restarted
//! ```
//!
//! Any error moves the session to `Failed`. The device is only told to
//! activate the new firmware after the CRC32 it reports for the stored file
//! matched the local stream, so a broken or partial upload never gets
//! flashed.
//!
//! All steps run one after another on the caller's task. The chunk exchange
//! itself is request/response and belongs to the [`FileTransferService`].

use std::path::Path;
use std::time::{Duration, Instant};

use protocol::{
    crc32, negotiate_package_size, ApplicationIdentity, BusConnection, ChunkLayout, DeviceSession,
    FileTransferService, ProtocolError, ProtocolVersion, TransferProgress, UploadRequest,
    FIRST_DATA_SEQUENCE, IDENTITY_OBJECT_INDEX, IDENTITY_PROPERTY_ID,
};
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::events::{TransferEvent, TransferObserver, TransferState};
use crate::config::TransferConfig;
use crate::files::{normalize, InputFormat, NormalizedStream, ResumePlanner, TransferPlan};
use crate::ui::Confirm;
use crate::update::gate::{self, GateDecision};

/// Where firmware is stored before the device activates it.
pub const FIRMWARE_TARGET: &str = "/firmware.bin";

/// Interface object of the firmware restart function.
pub const RESTART_OBJECT_INDEX: u8 = 159;

/// Function id that activates a stored firmware and restarts the device.
pub const RESTART_FUNCTION_ID: u8 = 101;

/// Tunables of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Requested package size; the device may reduce it.
    pub package_size: usize,
    /// Pause between packages.
    pub package_delay: Duration,
    /// Bound for connecting and binding the device.
    pub device_timeout: Duration,
    /// Continue interrupted uploads when the device supports it.
    pub resume: bool,
    /// Skip the compatibility check of firmware updates.
    pub force: bool,
}

impl SessionOptions {
    pub fn from_config(config: &TransferConfig, force: bool) -> Self {
        Self {
            package_size: config.package_size,
            package_delay: config.package_delay(),
            device_timeout: config.device_timeout(),
            resume: config.resume,
            force,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default(), false)
    }
}

/// Summary of a finished upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Where the transfer started.
    pub plan: TransferPlan,
    /// Size of the content before compression.
    pub original_size: u64,
    /// Size of the stored file.
    pub transferred_size: u64,
    /// Bytes sent in this session.
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

/// What `info` reports about a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Version string of the file transfer service.
    pub remote_version: String,
    /// Application identity, if the device reported one.
    pub identity: Option<ApplicationIdentity>,
    /// Package size after negotiation.
    pub package_size: usize,
}

/// Turns transfer progress into progress events.
struct ProgressMeter {
    started: Instant,
    /// Bytes already stored when the transfer started.
    offset: u64,
}

impl ProgressMeter {
    fn new(offset: u64) -> Self {
        Self {
            started: Instant::now(),
            offset,
        }
    }

    fn event(&self, progress: TransferProgress) -> TransferEvent {
        let sent = progress.bytes_done.saturating_sub(self.offset);
        let elapsed = self.started.elapsed().as_secs_f64();
        let bytes_per_sec = if elapsed > 0.0 {
            (sent as f64 / elapsed) as u64
        } else {
            0
        };
        let remaining = progress.total_bytes.saturating_sub(progress.bytes_done);
        let secs_left = if bytes_per_sec > 0 {
            remaining.div_ceil(bytes_per_sec)
        } else {
            0
        };
        TransferEvent::Progress {
            percent: progress.percent(),
            bytes_per_sec,
            secs_left,
        }
    }
}

fn emit_to(observer: &mut Option<Box<dyn TransferObserver>>, event: TransferEvent) {
    if let Some(observer) = observer {
        observer.on_event(&event);
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// A session with one device.
///
/// The bus connection and the device session are acquired by [`open`] and
/// released by [`close`]. [`firmware_update`] closes the session itself on
/// every path; for everything else the owner calls [`close`].
///
/// [`open`]: TransferSession::open
/// [`close`]: TransferSession::close
/// [`firmware_update`]: TransferSession::firmware_update
pub struct TransferSession<B, D> {
    bus: B,
    device: D,
    options: SessionOptions,
    planner: ResumePlanner,
    observer: Option<Box<dyn TransferObserver>>,
    state: TransferState,
    connected: bool,
    bound: bool,
    /// Package size negotiated on bind.
    package_size: usize,
    version: Option<ProtocolVersion>,
}

impl<B, D> TransferSession<B, D>
where
    B: BusConnection,
    D: DeviceSession + FileTransferService,
{
    /// Create a session; nothing is connected yet.
    pub fn new(bus: B, device: D, options: SessionOptions) -> Self {
        let package_size = options.package_size;
        Self {
            bus,
            device,
            options,
            planner: ResumePlanner::new(),
            observer: None,
            state: TransferState::Disconnected,
            connected: false,
            bound: false,
            package_size,
            version: None,
        }
    }

    /// Deliver events to `observer`.
    pub fn with_observer(mut self, observer: impl TransferObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Use a specific resume planner.
    pub fn with_planner(mut self, planner: ResumePlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns `true` while the device session is bound.
    pub fn is_open(&self) -> bool {
        self.bound
    }

    /// Package size in use; the negotiated one once the session is open.
    pub fn package_size(&self) -> usize {
        self.package_size
    }

    /// The file transfer service of the device.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn emit(&mut self, event: TransferEvent) {
        emit_to(&mut self.observer, event);
    }

    fn transition(&mut self, state: TransferState) {
        debug!(from = %self.state, to = %state, "Session state changed");
        self.state = state;
        self.emit(TransferEvent::StateChanged(state));
    }

    fn fail(&mut self, error: &SessionError) {
        warn!(error = %error, "Session failed");
        self.transition(TransferState::Failed);
        self.emit(TransferEvent::Error(error.to_string()));
    }

    /// Connect to the bus and bind the device.
    ///
    /// Both steps are bounded by the device timeout. Does nothing if the
    /// session is already open.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.bound {
            return Ok(());
        }
        let timeout = self.options.device_timeout;

        if !self.connected {
            match tokio::time::timeout(timeout, self.bus.connect()).await {
                Err(_) => return Err(SessionError::Timeout(timeout)),
                Ok(Err(e)) => return Err(SessionError::Connectivity(e)),
                Ok(Ok(())) => {}
            }
            self.connected = true;
            info!("Bus connected");
            self.transition(TransferState::BusConnected);
        }

        let max_frame_len = match tokio::time::timeout(timeout, self.device.bind()).await {
            Err(_) => return Err(SessionError::Timeout(timeout)),
            Ok(Err(e)) => return Err(SessionError::Connectivity(e)),
            Ok(Ok(len)) => len,
        };
        self.bound = true;

        let negotiated = negotiate_package_size(self.options.package_size, max_frame_len)?;
        if negotiated.was_reduced() {
            warn!(
                requested = negotiated.requested,
                negotiated = negotiated.size,
                "Device reduced the package size"
            );
            self.emit(TransferEvent::PackageSizeReduced {
                requested: negotiated.requested,
                negotiated: negotiated.size,
            });
        }
        self.package_size = negotiated.size;
        debug!(max_frame_len, package_size = self.package_size, "Device bound");
        self.transition(TransferState::DeviceBound);
        Ok(())
    }

    /// Release the device session but keep the bus connection.
    ///
    /// The next [`open`](Self::open) binds the device again.
    pub async fn release_device(&mut self) {
        if self.bound {
            if let Err(e) = self.device.unbind().await {
                debug!(error = %e, "Device unbind failed");
            }
            self.bound = false;
        }
    }

    /// Release the device session and the bus connection.
    ///
    /// Never fails; release errors are logged because the device may already
    /// be gone (for example after a restart).
    pub async fn close(&mut self) {
        self.release_device().await;
        if self.connected {
            if let Err(e) = self.bus.disconnect().await {
                warn!(error = %e, "Bus disconnect failed");
            }
            self.connected = false;
            info!("Bus disconnected");
        }
        self.version = None;

        if !matches!(
            self.state,
            TransferState::Disconnected | TransferState::Restarted | TransferState::Failed
        ) {
            self.transition(TransferState::Disconnected);
        }
    }

    /// Query the protocol version of the file transfer service.
    pub async fn check_version(&mut self) -> Result<ProtocolVersion, SessionError> {
        let remote = self.device.check_version().await?;
        let version: ProtocolVersion = remote.parse()?;
        info!(remote = %remote, %version, "Remote version checked");
        self.emit(TransferEvent::Info(format!("Remote version: {remote}")));
        self.version = Some(version);
        self.transition(TransferState::VersionChecked);
        Ok(version)
    }

    async fn version(&mut self) -> Result<ProtocolVersion, SessionError> {
        match self.version {
            Some(version) => Ok(version),
            None => self.check_version().await,
        }
    }

    /// Read the application identity of the device.
    pub async fn read_identity(&mut self) -> Result<ApplicationIdentity, ProtocolError> {
        let response = self
            .device
            .property_read(IDENTITY_OBJECT_INDEX, IDENTITY_PROPERTY_ID)
            .await?;
        ApplicationIdentity::from_property(&response)
    }

    /// Open the session and collect version and identity of the device.
    pub async fn device_info(&mut self) -> Result<DeviceInfo, SessionError> {
        self.open().await?;
        let remote_version = self.device.check_version().await?;
        let identity = match self.read_identity().await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Application identity unavailable");
                None
            }
        };
        Ok(DeviceInfo {
            remote_version,
            identity,
            package_size: self.package_size,
        })
    }

    /// Flash a firmware file.
    ///
    /// Normalizes the input, checks compatibility (container inputs, unless
    /// forced), uploads to [`FIRMWARE_TARGET`] continuing an interrupted
    /// transfer where possible, verifies the stored file and restarts the
    /// device. The session is closed afterwards on every path.
    pub async fn firmware_update(
        &mut self,
        firmware: &Path,
        confirm: &mut dyn Confirm,
    ) -> Result<TransferReport, SessionError> {
        let result = self.run_firmware_update(firmware, confirm).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        self.close().await;
        result
    }

    async fn run_firmware_update(
        &mut self,
        firmware: &Path,
        confirm: &mut dyn Confirm,
    ) -> Result<TransferReport, SessionError> {
        let stream = normalize(firmware)?;
        self.describe_input(&stream);

        self.open().await?;
        let version = self.version().await?;
        self.compatibility_gate(&stream, confirm).await?;

        let resumable = self.resume_supported().await;
        let plan = self
            .plan(&stream.bytes, FIRMWARE_TARGET, version, resumable)
            .await;
        let report = self
            .send(&stream.bytes, FIRMWARE_TARGET, plan, version, stream.original_size)
            .await?;

        self.verify(&stream.bytes, FIRMWARE_TARGET).await?;
        self.restart(FIRMWARE_TARGET).await;
        Ok(report)
    }

    fn describe_input(&mut self, stream: &NormalizedStream) {
        let note = match stream.format {
            InputFormat::Binary => "Compatibility cannot be checked for .bin files; the image is transferred compressed",
            InputFormat::Gzip => "Compatibility cannot be checked for .gz files",
            InputFormat::Container => "The firmware is transferred compressed",
        };
        self.emit(TransferEvent::Info(note.to_string()));

        let mut sizes = format!(
            "Size: {} bytes ({} kB) original",
            stream.original_size,
            stream.original_size / 1024
        );
        if stream.is_compressed() {
            sizes.push_str(&format!(", {} bytes ({} kB) compressed", stream.len(), stream.len() / 1024));
        }
        self.emit(TransferEvent::Info(sizes));
    }

    async fn compatibility_gate(
        &mut self,
        stream: &NormalizedStream,
        confirm: &mut dyn Confirm,
    ) -> Result<(), SessionError> {
        if !stream.format.carries_identity() {
            return Ok(());
        }
        if self.options.force {
            self.emit(TransferEvent::Warning(
                "Firmware is transferred whatever runs on the device; make sure the hardware supports it"
                    .to_string(),
            ));
            return Ok(());
        }

        let firmware = match stream.firmware_identity() {
            Some(Ok(identity)) => identity,
            Some(Err(e)) => {
                warn!(error = %e, "Application tag unreadable");
                self.emit(TransferEvent::Warning(format!(
                    "Application tag unreadable, compatibility not checked: {e}"
                )));
                return Ok(());
            }
            None => {
                self.emit(TransferEvent::Info(
                    "The container carries no application version".to_string(),
                ));
                return Ok(());
            }
        };
        self.emit(TransferEvent::Info(format!("Version firmware: {firmware}")));

        let device = match self.read_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Application identity unavailable");
                self.emit(TransferEvent::Warning(
                    "Could not read the application version of the device; compatibility is not checked"
                        .to_string(),
                ));
                return Ok(());
            }
        };
        self.emit(TransferEvent::Info(format!("Version device:   {device}")));

        let (classification, decision) = gate::check(&firmware, &device, confirm);
        if decision == GateDecision::Abort {
            return Err(SessionError::Aborted(classification.to_string()));
        }
        self.transition(TransferState::CompatibilityChecked);
        Ok(())
    }

    async fn resume_supported(&mut self) -> bool {
        if !self.options.resume {
            debug!("Resume disabled");
            return false;
        }
        match self.device.supports_resume().await {
            Ok(supported) => {
                debug!(supported, "Resume support queried");
                supported
            }
            Err(e) => {
                warn!(error = %e, "Resume support unknown, starting fresh");
                false
            }
        }
    }

    async fn plan(
        &mut self,
        data: &[u8],
        target: &str,
        version: ProtocolVersion,
        resumable: bool,
    ) -> TransferPlan {
        let plan = if resumable {
            self.planner
                .plan(&mut self.device, data, target, self.package_size, version)
                .await
        } else {
            TransferPlan::FRESH
        };

        if plan.already_complete {
            self.emit(TransferEvent::Info(
                "The device already holds the complete file".to_string(),
            ));
        } else if plan.is_resumed() {
            self.emit(TransferEvent::Info(format!(
                "Continuing interrupted transfer at chunk {}",
                plan.start_sequence
            )));
        }
        self.transition(TransferState::Planned);
        plan
    }

    async fn send(
        &mut self,
        data: &[u8],
        target: &str,
        plan: TransferPlan,
        version: ProtocolVersion,
        original_size: u64,
    ) -> Result<TransferReport, SessionError> {
        let started = Instant::now();
        let total = data.len() as u64;
        let layout = ChunkLayout::new(self.package_size, version)?;
        let offset = layout.offset_of(plan.start_sequence).min(total);

        let bytes_sent = if plan.already_complete {
            0
        } else {
            self.transition(TransferState::Uploading);
            let meter = ProgressMeter::new(offset);
            let request = UploadRequest {
                data,
                target,
                package_size: self.package_size,
                start_sequence: plan.start_sequence,
                package_delay: self.options.package_delay,
            };
            let observer = &mut self.observer;
            self.device
                .file_upload(request, &mut |progress| emit_to(observer, meter.event(progress)))
                .await?;

            let elapsed = started.elapsed();
            info!(target, bytes = total - offset, ?elapsed, "Upload finished");
            self.emit(TransferEvent::Info(format!(
                "Transfer finished in {}",
                format_elapsed(elapsed)
            )));
            total - offset
        };

        Ok(TransferReport {
            plan,
            original_size,
            transferred_size: total,
            bytes_sent,
            elapsed: started.elapsed(),
        })
    }

    async fn verify(&mut self, data: &[u8], target: &str) -> Result<(), SessionError> {
        let local = crc32(data);
        let remote = self.device.file_info(target).await?;
        if remote.crc32 != local || remote.size != data.len() as u64 {
            return Err(SessionError::VerificationFailed {
                local,
                remote: remote.crc32,
            });
        }
        debug!(crc32 = local, size = remote.size, "Stored file verified");
        self.transition(TransferState::Verified);
        Ok(())
    }

    async fn restart(&mut self, target: &str) {
        let mut payload = target.as_bytes().to_vec();
        payload.push(0);

        self.emit(TransferEvent::Info("Restarting device".to_string()));
        // The device reboots and usually drops the connection before answering
        match self
            .device
            .invoke_function(RESTART_OBJECT_INDEX, RESTART_FUNCTION_ID, &payload)
            .await
        {
            Ok(_) => debug!("Restart acknowledged"),
            Err(e) => debug!(error = %e, "Restart not acknowledged"),
        }
        self.transition(TransferState::Restarted);
    }

    /// Upload a local file unchanged.
    ///
    /// An existing target is replaced only after confirmation unless the
    /// transfer can continue from it. The session stays open.
    pub async fn upload_file(
        &mut self,
        local: &Path,
        target: &str,
        confirm: &mut dyn Confirm,
    ) -> Result<TransferReport, SessionError> {
        let result = self.run_upload_file(local, target, confirm).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn run_upload_file(
        &mut self,
        local: &Path,
        target: &str,
        confirm: &mut dyn Confirm,
    ) -> Result<TransferReport, SessionError> {
        let data = tokio::fs::read(local).await.map_err(ProtocolError::from)?;

        self.open().await?;
        let version = self.version().await?;
        let resumable = self.resume_supported().await;

        if !resumable && self.device.exists(target).await? {
            let question = format!("{target} already exists on the device. Delete it?");
            if !confirm.confirm(&question) {
                return Err(SessionError::Aborted(format!("{target} kept")));
            }
            self.device.file_delete(target).await?;
            self.emit(TransferEvent::Info(format!("{target} deleted")));
        }

        let plan = self.plan(&data, target, version, resumable).await;
        let size = data.len() as u64;
        self.send(&data, target, plan, version, size).await
    }

    /// Download a remote file to `local`.
    ///
    /// Devices that report file checksums get the download verified before
    /// anything is written locally.
    pub async fn download_file(&mut self, remote: &str, local: &Path) -> Result<u64, SessionError> {
        self.open().await?;
        let package_size = self.package_size;
        let meter = ProgressMeter::new(0);
        let observer = &mut self.observer;
        let data = self
            .device
            .file_download(remote, package_size, FIRST_DATA_SEQUENCE, &mut |progress| {
                emit_to(observer, meter.event(progress))
            })
            .await?;

        let reports_checksums = match self.device.supports_resume().await {
            Ok(supported) => supported,
            Err(e) => {
                warn!(error = %e, "Checksum support unknown, download not verified");
                false
            }
        };
        if reports_checksums {
            let remote_info = self.device.file_info(remote).await?;
            let actual = crc32(&data);
            if remote_info.crc32 != actual {
                return Err(ProtocolError::ChecksumMismatch {
                    expected: remote_info.crc32,
                    actual,
                }
                .into());
            }
        }

        tokio::fs::write(local, &data).await.map_err(ProtocolError::from)?;
        Ok(data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RecordingObserver;
    use crate::ui::FixedAnswer;
    use crate::virtual_device::VirtualDevice;
    use tempfile::TempDir;

    fn session(device: &VirtualDevice, options: SessionOptions) -> TransferSession<VirtualDevice, VirtualDevice> {
        TransferSession::new(device.clone(), device.clone(), options)
    }

    #[test]
    fn test_options_from_config() {
        let mut config = TransferConfig::default();
        config.package_size = 64;
        config.package_delay_ms = 20;
        config.resume = false;

        let options = SessionOptions::from_config(&config, true);
        assert_eq!(options.package_size, 64);
        assert_eq!(options.package_delay, Duration::from_millis(20));
        assert_eq!(options.device_timeout, Duration::from_secs(4));
        assert!(!options.resume);
        assert!(options.force);
    }

    #[test]
    fn test_progress_meter_event() {
        let meter = ProgressMeter::new(100);
        let event = meter.event(TransferProgress {
            sequence: 3,
            bytes_done: 150,
            total_bytes: 200,
        });
        assert!(matches!(event, TransferEvent::Progress { percent: 75, .. }));
    }

    #[tokio::test]
    async fn test_open_negotiates_package_size() {
        let device = VirtualDevice::new().with_max_frame_len(55);
        let recorder = RecordingObserver::new();
        let mut session = session(&device, SessionOptions::default()).with_observer(recorder.clone());

        session.open().await.unwrap();
        assert_eq!(session.package_size(), 49);
        assert!(recorder.events().contains(&TransferEvent::PackageSizeReduced {
            requested: 128,
            negotiated: 49
        }));
        assert_eq!(
            recorder.states(),
            vec![TransferState::BusConnected, TransferState::DeviceBound]
        );

        session.close().await;
        assert!(!device.is_connected());
        assert_eq!(session.state(), TransferState::Disconnected);
    }

    #[tokio::test]
    async fn test_open_unreachable() {
        let device = VirtualDevice::new().unreachable();
        let mut session = session(&device, SessionOptions::default());

        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::Connectivity(_)));
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_open_times_out() {
        let device = VirtualDevice::new().with_bind_delay(Duration::from_millis(500));
        let options = SessionOptions {
            device_timeout: Duration::from_millis(20),
            ..SessionOptions::default()
        };
        let mut session = session(&device, options);

        let err = session.open().await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));

        session.close().await;
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_upload_file_asks_before_replacing() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("notes.txt");
        std::fs::write(&local, b"new content").unwrap();

        let device = VirtualDevice::new().with_resume(false).with_file("/notes.txt", b"old".to_vec());
        let mut session = session(&device, SessionOptions::default());

        let mut no = FixedAnswer::new(false);
        let err = session.upload_file(&local, "/notes.txt", &mut no).await.unwrap_err();
        assert_eq!(err.exit_code(), crate::session::EXIT_USER_ABORT);
        assert_eq!(device.file("/notes.txt").unwrap(), b"old");
        assert!(device.received_sequences().is_empty());

        let mut yes = FixedAnswer::new(true);
        let report = session.upload_file(&local, "/notes.txt", &mut yes).await.unwrap();
        assert_eq!(report.bytes_sent, 11);
        assert_eq!(device.file("/notes.txt").unwrap(), b"new content");
        session.close().await;
    }

    #[tokio::test]
    async fn test_download_file() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("copy.bin");
        let device = VirtualDevice::new().with_file("/data.bin", vec![9u8; 300]);
        let mut session = session(&device, SessionOptions::default());

        let size = session.download_file("/data.bin", &local).await.unwrap();
        session.close().await;

        assert_eq!(size, 300);
        assert_eq!(std::fs::read(&local).unwrap(), vec![9u8; 300]);
    }

    #[tokio::test]
    async fn test_download_checksum_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("copy.bin");
        let device = VirtualDevice::new()
            .with_file("/data.bin", vec![1u8; 64])
            .corrupt_crc();
        let mut session = session(&device, SessionOptions::default());

        let err = session.download_file("/data.bin", &local).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::ChecksumMismatch { .. })
        ));
        assert!(!local.exists());
        session.close().await;
    }

    #[tokio::test]
    async fn test_download_verified_with_resume_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("copy.bin");
        let device = VirtualDevice::new()
            .with_file("/data.bin", vec![1u8; 64])
            .corrupt_crc();
        let options = SessionOptions {
            resume: false,
            ..SessionOptions::default()
        };
        let mut session = session(&device, options);

        let err = session.download_file("/data.bin", &local).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::ChecksumMismatch { .. })
        ));
        assert!(!local.exists());
        session.close().await;
    }

    #[tokio::test]
    async fn test_release_device_keeps_bus() {
        let device = VirtualDevice::new();
        let mut session = session(&device, SessionOptions::default());

        session.open().await.unwrap();
        session.release_device().await;
        assert!(!session.is_open());
        assert!(device.is_connected());
        assert!(!device.is_bound());

        session.open().await.unwrap();
        assert!(device.is_bound());
        session.close().await;
        assert!(!device.is_connected());
    }

    #[tokio::test]
    async fn test_device_info() {
        let identity = ApplicationIdentity {
            open_knx_id: 0xa0,
            app_number: 0x31,
            app_version: 0x12,
            app_revision: 5,
        };
        let device = VirtualDevice::new().with_version("2.1").with_identity(identity);
        let mut session = session(&device, SessionOptions::default());

        let info = session.device_info().await.unwrap();
        assert_eq!(info.remote_version, "2.1");
        assert_eq!(info.identity, Some(identity));
        assert_eq!(info.package_size, 128);
        session.close().await;
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(75)), "01:15");
        assert_eq!(format_elapsed(Duration::ZERO), "00:00");
    }
}
