//! End-to-end tests of firmware updates against the virtual device.
//!
//! These tests verify complete flows:
//! - Compatibility decisions before anything is written
//! - Continuing interrupted uploads
//! - Verification and restart
//! - Connection release on every path

use std::path::{Path, PathBuf};
use std::time::Duration;

use client::files::{normalize, ResumePlanner};
use client::session::{
    RecordingObserver, SessionError, SessionOptions, TransferEvent, TransferSession, TransferState,
    EXIT_USER_ABORT, FIRMWARE_TARGET, RESTART_FUNCTION_ID, RESTART_OBJECT_INDEX,
};
use client::ui::FixedAnswer;
use client::virtual_device::VirtualDevice;
use protocol::{ApplicationIdentity, ProtocolError};
use tempfile::TempDir;

/// Tag type of the application identity.
const KNX_APPLICATION_TAG: u32 = 0x58_4e4b;

const DEVICE: ApplicationIdentity = ApplicationIdentity {
    open_knx_id: 0xa0,
    app_number: 0x31,
    app_version: 0x12,
    app_revision: 3,
};

/// Build one container block.
fn container_block(address: u32, payload: &[u8], sequence: u32, count: u32, tag: Option<&[u8]>) -> Vec<u8> {
    let mut block = vec![0u8; 512];
    let flags: u32 = if tag.is_some() { 0x8000 } else { 0 };
    block[0..4].copy_from_slice(&0x0A32_4655u32.to_le_bytes());
    block[4..8].copy_from_slice(&0x9E5D_5157u32.to_le_bytes());
    block[8..12].copy_from_slice(&flags.to_le_bytes());
    block[12..16].copy_from_slice(&address.to_le_bytes());
    block[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    block[20..24].copy_from_slice(&sequence.to_le_bytes());
    block[24..28].copy_from_slice(&count.to_le_bytes());
    block[32..32 + payload.len()].copy_from_slice(payload);
    if let Some(data) = tag {
        let offset = 32 + payload.len();
        block[offset] = (data.len() + 4) as u8;
        block[offset + 1..offset + 4].copy_from_slice(&KNX_APPLICATION_TAG.to_le_bytes()[..3]);
        block[offset + 4..offset + 4 + data.len()].copy_from_slice(data);
    }
    block[508..512].copy_from_slice(&0x0AB1_6F30u32.to_le_bytes());
    block
}

/// Write a container firmware for `identity` into `dir`.
fn write_container(dir: &Path, identity: ApplicationIdentity) -> PathBuf {
    let tag = [
        identity.open_knx_id,
        identity.app_number,
        identity.app_version,
        identity.app_revision,
    ];
    let mut file = Vec::new();
    for sequence in 0..8u32 {
        let payload: Vec<u8> = (0..256u32).map(|i| (i * 7 + sequence * 13) as u8).collect();
        let tag = (sequence == 0).then_some(&tag[..]);
        file.extend(container_block(0x2000 + sequence * 256, &payload, sequence, 8, tag));
    }

    let path = dir.join("firmware.uf2");
    std::fs::write(&path, file).unwrap();
    path
}

/// Write 2900 bytes (50 chunks of 58 bytes at package size 64) as a
/// pre-compressed firmware.
fn write_gzip(dir: &Path) -> (PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..2900u32).map(|i| (i * 31 % 251) as u8).collect();
    let path = dir.join("firmware.gz");
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

fn options(package_size: usize) -> SessionOptions {
    SessionOptions {
        package_size,
        ..SessionOptions::default()
    }
}

fn create_session(
    device: &VirtualDevice,
    options: SessionOptions,
) -> (TransferSession<VirtualDevice, VirtualDevice>, RecordingObserver) {
    let recorder = RecordingObserver::new();
    let session = TransferSession::new(device.clone(), device.clone(), options)
        .with_planner(ResumePlanner::new().with_grace_period(Duration::from_millis(10)))
        .with_observer(recorder.clone());
    (session, recorder)
}

fn assert_released(device: &VirtualDevice) {
    assert!(!device.is_connected());
    assert!(!device.is_bound());
}

// =============================================================================
// Successful updates
// =============================================================================

#[tokio::test]
async fn test_upgrade_runs_without_question() {
    let temp_dir = TempDir::new().unwrap();
    let newer = ApplicationIdentity {
        app_version: 0x13,
        ..DEVICE
    };
    let firmware = write_container(temp_dir.path(), newer);

    let device = VirtualDevice::new().with_identity(DEVICE);
    let (mut session, recorder) = create_session(&device, SessionOptions::default());
    let mut confirm = FixedAnswer::new(false);

    let report = session.firmware_update(&firmware, &mut confirm).await.unwrap();

    assert_eq!(confirm.asked(), 0);
    let stream = normalize(&firmware).unwrap();
    assert_eq!(device.file(FIRMWARE_TARGET).unwrap(), stream.bytes);
    assert_eq!(report.bytes_sent, stream.len() as u64);
    assert_eq!(report.original_size, 8 * 256);
    assert!(!report.plan.is_resumed());

    let restarts = device.invocations();
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].object_index, RESTART_OBJECT_INDEX);
    assert_eq!(restarts[0].function_id, RESTART_FUNCTION_ID);
    assert_eq!(restarts[0].data, b"/firmware.bin\0");

    assert_eq!(
        recorder.states(),
        vec![
            TransferState::BusConnected,
            TransferState::DeviceBound,
            TransferState::VersionChecked,
            TransferState::CompatibilityChecked,
            TransferState::Planned,
            TransferState::Uploading,
            TransferState::Verified,
            TransferState::Restarted,
        ]
    );
    assert_eq!(session.state(), TransferState::Restarted);
    assert_released(&device);
}

#[tokio::test]
async fn test_progress_reaches_complete() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, _) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new();
    let (mut session, recorder) = create_session(&device, options(64));
    session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    let percents: Vec<u8> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            TransferEvent::Progress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents.len(), 50);
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn test_new_device_confirmed() {
    let temp_dir = TempDir::new().unwrap();
    let other_app = ApplicationIdentity {
        app_number: 0x40,
        ..DEVICE
    };
    let firmware = write_container(temp_dir.path(), other_app);

    let device = VirtualDevice::new().with_identity(DEVICE);
    let (mut session, _) = create_session(&device, SessionOptions::default());
    let mut confirm = FixedAnswer::new(true);

    session.firmware_update(&firmware, &mut confirm).await.unwrap();

    assert_eq!(confirm.asked(), 1);
    assert!(confirm.questions()[0].ends_with("Update anyway?"));
    assert_eq!(device.invocations().len(), 1);
}

#[tokio::test]
async fn test_force_skips_compatibility_check() {
    let temp_dir = TempDir::new().unwrap();
    let firmware = write_container(temp_dir.path(), DEVICE);

    let device = VirtualDevice::new().with_identity(DEVICE);
    let options = SessionOptions {
        force: true,
        ..SessionOptions::default()
    };
    let (mut session, recorder) = create_session(&device, options);
    let mut confirm = FixedAnswer::new(false);

    session.firmware_update(&firmware, &mut confirm).await.unwrap();

    assert_eq!(confirm.asked(), 0);
    assert!(!recorder.states().contains(&TransferState::CompatibilityChecked));
    assert!(recorder
        .events()
        .iter()
        .any(|event| matches!(event, TransferEvent::Warning(_))));
    assert_eq!(device.invocations().len(), 1);
}

#[tokio::test]
async fn test_unreadable_identity_skips_check() {
    let temp_dir = TempDir::new().unwrap();
    let firmware = write_container(temp_dir.path(), DEVICE);

    let device = VirtualDevice::new().with_identity(DEVICE).fail_identity_read();
    let (mut session, recorder) = create_session(&device, SessionOptions::default());
    let mut confirm = FixedAnswer::new(false);

    session.firmware_update(&firmware, &mut confirm).await.unwrap();

    assert_eq!(confirm.asked(), 0);
    assert!(recorder
        .events()
        .iter()
        .any(|event| matches!(event, TransferEvent::Warning(_))));
    assert_eq!(session.state(), TransferState::Restarted);
}

// =============================================================================
// Declined updates
// =============================================================================

#[tokio::test]
async fn test_identical_version_declined() {
    let temp_dir = TempDir::new().unwrap();
    let firmware = write_container(temp_dir.path(), DEVICE);

    let device = VirtualDevice::new().with_identity(DEVICE);
    let (mut session, recorder) = create_session(&device, SessionOptions::default());
    let mut confirm = FixedAnswer::new(false);

    let err = session.firmware_update(&firmware, &mut confirm).await.unwrap_err();

    assert!(matches!(err, SessionError::Aborted(_)));
    assert_eq!(err.exit_code(), EXIT_USER_ABORT);
    assert_eq!(confirm.asked(), 1);
    assert!(device.received_sequences().is_empty());
    assert!(device.property_writes().is_empty());
    assert!(device.invocations().is_empty());
    assert!(device.file(FIRMWARE_TARGET).is_none());

    let states = recorder.states();
    assert_eq!(states.last(), Some(&TransferState::Failed));
    assert!(!states.contains(&TransferState::Planned));
    assert_released(&device);
}

#[tokio::test]
async fn test_downgrade_declined() {
    let temp_dir = TempDir::new().unwrap();
    // Older version with a higher revision is still older
    let older = ApplicationIdentity {
        app_version: 0x11,
        app_revision: 9,
        ..DEVICE
    };
    let firmware = write_container(temp_dir.path(), older);

    let device = VirtualDevice::new().with_identity(DEVICE);
    let (mut session, _) = create_session(&device, SessionOptions::default());
    let mut confirm = FixedAnswer::new(false);

    let err = session.firmware_update(&firmware, &mut confirm).await.unwrap_err();

    assert_eq!(err.exit_code(), EXIT_USER_ABORT);
    assert!(confirm.questions()[0].contains("downgrade"));
    assert!(device.received_sequences().is_empty());
    assert!(device.invocations().is_empty());
    assert_eq!(session.state(), TransferState::Failed);
    assert_released(&device);
}

// =============================================================================
// Resume
// =============================================================================

#[tokio::test]
async fn test_resume_after_forty_percent() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, data) = write_gzip(temp_dir.path());

    // 20 of 50 chunks already stored
    let device = VirtualDevice::new().with_file(FIRMWARE_TARGET, data[..20 * 58].to_vec());
    let (mut session, _) = create_session(&device, options(64));

    let report = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    assert_eq!(report.plan.start_sequence, 21);
    assert_eq!(report.bytes_sent, (30 * 58) as u64);
    assert_eq!(device.received_sequences(), (21..=50).collect::<Vec<u32>>());
    assert_eq!(device.file(FIRMWARE_TARGET).unwrap(), data);
    assert_eq!(device.invocations().len(), 1);
}

#[tokio::test]
async fn test_resume_prefix_mismatch_starts_over() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, data) = write_gzip(temp_dir.path());

    let mut partial = data[..20 * 58].to_vec();
    partial[100] ^= 0xff;
    let device = VirtualDevice::new().with_file(FIRMWARE_TARGET, partial);
    let (mut session, _) = create_session(&device, options(64));

    session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    let sequences = device.received_sequences();
    assert_eq!(sequences.first(), Some(&1));
    assert_eq!(sequences.len(), 50);
    assert_eq!(device.file(FIRMWARE_TARGET).unwrap(), data);
}

#[tokio::test]
async fn test_complete_file_is_not_sent_again() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, data) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new().with_file(FIRMWARE_TARGET, data.clone());
    let (mut session, recorder) = create_session(&device, options(64));

    let report = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    assert!(report.plan.already_complete);
    assert_eq!(report.bytes_sent, 0);
    assert!(device.received_sequences().is_empty());
    assert!(!recorder.states().contains(&TransferState::Uploading));
    assert_eq!(session.state(), TransferState::Restarted);
}

#[tokio::test]
async fn test_resume_disabled_starts_over() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, data) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new().with_file(FIRMWARE_TARGET, data[..20 * 58].to_vec());
    let options = SessionOptions {
        resume: false,
        ..options(64)
    };
    let (mut session, _) = create_session(&device, options);

    session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    assert_eq!(device.received_sequences().len(), 50);
}

#[tokio::test]
async fn test_interrupted_upload_continues_next_run() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, data) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new().fail_upload_after(12);
    let (mut session, _) = create_session(&device, options(64));

    let err = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Protocol(ProtocolError::TransferFailed(_))));
    assert!(device.invocations().is_empty());
    assert_eq!(session.state(), TransferState::Failed);
    assert_released(&device);

    let (mut session, _) = create_session(&device, options(64));
    let report = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    assert_eq!(report.plan.start_sequence, 13);
    assert_eq!(device.file(FIRMWARE_TARGET).unwrap(), data);
    assert_eq!(device.invocations().len(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_verification_failure_withholds_restart() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, _) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new().corrupt_crc();
    let (mut session, recorder) = create_session(&device, options(64));

    let err = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::VerificationFailed { .. }));
    assert!(device.invocations().is_empty());
    assert!(!recorder.states().contains(&TransferState::Verified));
    assert!(recorder
        .events()
        .iter()
        .any(|event| matches!(event, TransferEvent::Error(_))));
    assert_released(&device);
}

#[tokio::test]
async fn test_unsupported_format_fails_before_connecting() {
    let temp_dir = TempDir::new().unwrap();
    let firmware = temp_dir.path().join("firmware.hex");
    std::fs::write(&firmware, b":00000001FF").unwrap();

    let device = VirtualDevice::new();
    let (mut session, recorder) = create_session(&device, SessionOptions::default());

    let err = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::UnsupportedFormat { .. })
    ));
    assert_eq!(recorder.states(), vec![TransferState::Failed]);
}

#[tokio::test]
async fn test_package_size_reduced_by_device() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, data) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new().with_max_frame_len(40);
    let (mut session, recorder) = create_session(&device, SessionOptions::default());

    session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap();

    assert!(recorder.events().contains(&TransferEvent::PackageSizeReduced {
        requested: 128,
        negotiated: 34,
    }));
    assert_eq!(session.package_size(), 34);
    assert_eq!(device.file(FIRMWARE_TARGET).unwrap(), data);
}

#[tokio::test]
async fn test_device_timeout() {
    let temp_dir = TempDir::new().unwrap();
    let (firmware, _) = write_gzip(temp_dir.path());

    let device = VirtualDevice::new().with_bind_delay(Duration::from_millis(500));
    let options = SessionOptions {
        device_timeout: Duration::from_millis(20),
        ..SessionOptions::default()
    };
    let (mut session, _) = create_session(&device, options);

    let err = session
        .firmware_update(&firmware, &mut FixedAnswer::new(true))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Timeout(_)));
    assert!(err.is_connectivity());
    assert_released(&device);
}
