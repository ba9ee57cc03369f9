//! In-memory device implementing the bus and file transfer contracts.
//!
//! Backs `connection.kind = "virtual"` for dry runs and serves as the
//! device in tests. Clones share the same state, so one clone can act as
//! the bus connection while another is the bound device session, and a
//! test can keep a third to inspect what the device received.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use protocol::{
    crc32, ApplicationIdentity, BusConnection, ChunkLayout, DeviceSession, FileTransferService,
    ProtocolError, ProtocolVersion, RemoteEntry, RemoteFileInfo, Result, TransferProgress,
    UploadRequest, FIRST_DATA_SEQUENCE, IDENTITY_OBJECT_INDEX, IDENTITY_PROPERTY_ID,
};
use tracing::{debug, trace};

use crate::session::{RESTART_FUNCTION_ID, RESTART_OBJECT_INDEX};

/// Frame length announced by default (extended frames).
pub const DEFAULT_MAX_FRAME_LEN: usize = 254;

/// A function invocation the device received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub object_index: u8,
    pub function_id: u8,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct DeviceState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    properties: HashMap<(u8, u8), Vec<u8>>,
    version: String,
    resume: bool,
    max_frame_len: usize,

    connected: bool,
    bound: bool,
    unreachable: bool,
    bind_delay: Duration,

    fail_upload_after: Option<usize>,
    corrupt_crc: bool,
    fail_identity_read: bool,
    empty_reports: usize,
    restart_drops_connection: bool,

    received_sequences: Vec<u32>,
    invocations: Vec<Invocation>,
    property_writes: Vec<(u8, u8, Vec<u8>)>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::from(["/".to_string()]),
            properties: HashMap::new(),
            version: "2".to_string(),
            resume: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connected: false,
            bound: false,
            unreachable: false,
            bind_delay: Duration::ZERO,
            fail_upload_after: None,
            corrupt_crc: false,
            fail_identity_read: false,
            empty_reports: 0,
            restart_drops_connection: true,
            received_sequences: Vec::new(),
            invocations: Vec::new(),
            property_writes: Vec::new(),
        }
    }
}

impl DeviceState {
    fn require_bound(&self) -> Result<()> {
        if !self.connected {
            return Err(ProtocolError::ConnectionClosed("bus not connected".to_string()));
        }
        if !self.bound {
            return Err(ProtocolError::ConnectionClosed("device not bound".to_string()));
        }
        Ok(())
    }

    fn layout(&self, package_size: usize) -> Result<ChunkLayout> {
        let version: ProtocolVersion = self.version.parse()?;
        ChunkLayout::new(package_size, version)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(&dir_key(path))
    }
}

/// Directory key with a trailing slash.
fn dir_key(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Name of `path` if it is a direct child of `dir` (given with a trailing slash).
fn child_name<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(dir)?.trim_end_matches('/');
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// An in-memory device.
#[derive(Debug, Clone, Default)]
pub struct VirtualDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    /// Create an empty device speaking protocol version 2 with resume support.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the version string reported by the file transfer service.
    pub fn with_version(self, version: &str) -> Self {
        self.lock().version = version.to_string();
        self
    }

    /// Enable or disable resume support.
    pub fn with_resume(self, resume: bool) -> Self {
        self.lock().resume = resume;
        self
    }

    /// Set the maximum frame length negotiated on bind.
    pub fn with_max_frame_len(self, len: usize) -> Self {
        self.lock().max_frame_len = len;
        self
    }

    /// Report an application identity through the hardware type property.
    pub fn with_identity(self, identity: ApplicationIdentity) -> Self {
        let value = vec![
            0,
            0,
            identity.open_knx_id,
            identity.app_number,
            identity.app_version,
            identity.app_revision,
        ];
        self.lock()
            .properties
            .insert((IDENTITY_OBJECT_INDEX, IDENTITY_PROPERTY_ID), value);
        self
    }

    /// Store a file.
    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.lock().files.insert(path.to_string(), data.into());
        self
    }

    /// Create a directory.
    pub fn with_dir(self, path: &str) -> Self {
        self.lock().dirs.insert(dir_key(path));
        self
    }

    /// Refuse bus connections.
    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// Delay every bind by `delay`.
    pub fn with_bind_delay(self, delay: Duration) -> Self {
        self.lock().bind_delay = delay;
        self
    }

    /// Fail the next upload after `chunks` data chunks were stored.
    pub fn fail_upload_after(self, chunks: usize) -> Self {
        self.lock().fail_upload_after = Some(chunks);
        self
    }

    /// Report wrong CRC values for stored files.
    pub fn corrupt_crc(self) -> Self {
        self.lock().corrupt_crc = true;
        self
    }

    /// Time out when the identity property is read.
    pub fn fail_identity_read(self) -> Self {
        self.lock().fail_identity_read = true;
        self
    }

    /// Report files as empty for the next `count` info queries.
    pub fn report_empty(self, count: usize) -> Self {
        self.lock().empty_reports = count;
        self
    }

    /// Whether the restart function answers instead of dropping the connection.
    pub fn restart_answers(self) -> Self {
        self.lock().restart_drops_connection = false;
        self
    }

    /// Content of a stored file.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Sequence numbers of all data chunks received, in order.
    pub fn received_sequences(&self) -> Vec<u32> {
        self.lock().received_sequences.clone()
    }

    /// All function invocations received, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    /// All property writes received, in order.
    pub fn property_writes(&self) -> Vec<(u8, u8, Vec<u8>)> {
        self.lock().property_writes.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_bound(&self) -> bool {
        self.lock().bound
    }
}

impl BusConnection for VirtualDevice {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(ProtocolError::ConnectionClosed("gateway unreachable".to_string()));
        }
        state.connected = true;
        debug!("Virtual bus connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.bound = false;
        state.connected = false;
        debug!("Virtual bus disconnected");
        Ok(())
    }
}

impl DeviceSession for VirtualDevice {
    async fn bind(&mut self) -> Result<usize> {
        let delay = {
            let state = self.lock();
            if !state.connected {
                return Err(ProtocolError::ConnectionClosed("bus not connected".to_string()));
            }
            state.bind_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.bound = true;
        Ok(state.max_frame_len)
    }

    async fn unbind(&mut self) -> Result<()> {
        self.lock().bound = false;
        Ok(())
    }

    async fn property_read(&mut self, object_index: u8, property_id: u8) -> Result<Vec<u8>> {
        let state = self.lock();
        state.require_bound()?;
        if state.fail_identity_read
            && (object_index, property_id) == (IDENTITY_OBJECT_INDEX, IDENTITY_PROPERTY_ID)
        {
            return Err(ProtocolError::Timeout("property read".to_string()));
        }
        Ok(state
            .properties
            .get(&(object_index, property_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn property_write(&mut self, object_index: u8, property_id: u8, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.require_bound()?;
        state.property_writes.push((object_index, property_id, data.to_vec()));
        state.properties.insert((object_index, property_id), data.to_vec());
        Ok(())
    }

    async fn invoke_function(&mut self, object_index: u8, function_id: u8, data: &[u8]) -> Result<Vec<u8>> {
        let mut state = self.lock();
        state.require_bound()?;
        state.invocations.push(Invocation {
            object_index,
            function_id,
            data: data.to_vec(),
        });

        if (object_index, function_id) == (RESTART_OBJECT_INDEX, RESTART_FUNCTION_ID) {
            debug!("Virtual device restarting");
            if state.restart_drops_connection {
                state.bound = false;
                return Err(ProtocolError::ConnectionClosed("device restarted".to_string()));
            }
        }
        Ok(vec![0])
    }
}

impl FileTransferService for VirtualDevice {
    async fn check_version(&mut self) -> Result<String> {
        let state = self.lock();
        state.require_bound()?;
        Ok(state.version.clone())
    }

    async fn supports_resume(&mut self) -> Result<bool> {
        let state = self.lock();
        state.require_bound()?;
        Ok(state.resume)
    }

    async fn format(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.require_bound()?;
        state.files.clear();
        state.dirs = BTreeSet::from(["/".to_string()]);
        Ok(())
    }

    async fn exists(&mut self, path: &str) -> Result<bool> {
        let state = self.lock();
        state.require_bound()?;
        Ok(state.files.contains_key(path) || state.is_dir(path))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.lock();
        state.require_bound()?;
        let data = state.files.remove(from).ok_or(ProtocolError::remote(0x45))?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    async fn file_delete(&mut self, path: &str) -> Result<()> {
        let mut state = self.lock();
        state.require_bound()?;
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or(ProtocolError::remote(0x44))
    }

    async fn file_info(&mut self, path: &str) -> Result<RemoteFileInfo> {
        let mut state = self.lock();
        state.require_bound()?;
        if state.empty_reports > 0 {
            state.empty_reports -= 1;
            return Ok(RemoteFileInfo::default());
        }
        let data = state.files.get(path).ok_or(ProtocolError::remote(0x42))?;
        let mut crc = crc32(data);
        if state.corrupt_crc {
            crc = !crc;
        }
        Ok(RemoteFileInfo {
            size: data.len() as u64,
            crc32: crc,
        })
    }

    async fn dir_list(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let state = self.lock();
        state.require_bound()?;
        let dir = dir_key(path);
        if !state.dirs.contains(&dir) {
            return Err(ProtocolError::remote(0x82));
        }

        let dirs = state.dirs.iter().filter_map(|d| child_name(&dir, d)).map(|name| RemoteEntry {
            name: name.to_string(),
            is_file: false,
        });
        let files = state.files.keys().filter_map(|f| child_name(&dir, f)).map(|name| RemoteEntry {
            name: name.to_string(),
            is_file: true,
        });
        Ok(dirs.chain(files).collect())
    }

    async fn dir_create(&mut self, path: &str) -> Result<()> {
        let mut state = self.lock();
        state.require_bound()?;
        if !state.dirs.insert(dir_key(path)) {
            return Err(ProtocolError::remote(0x85));
        }
        Ok(())
    }

    async fn dir_delete(&mut self, path: &str) -> Result<()> {
        let mut state = self.lock();
        state.require_bound()?;
        let dir = dir_key(path);
        let occupied = state.files.keys().any(|f| f.starts_with(&dir))
            || state.dirs.iter().any(|d| d != &dir && d.starts_with(&dir));
        if dir == "/" || occupied || !state.dirs.remove(&dir) {
            return Err(ProtocolError::remote(0x84));
        }
        Ok(())
    }

    async fn file_upload(
        &mut self,
        request: UploadRequest<'_>,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<()> {
        let layout = {
            let mut state = self.lock();
            state.require_bound()?;
            if request.package_size > state.max_frame_len {
                return Err(ProtocolError::TransferFailed(format!(
                    "package of {} bytes exceeds frame of {}",
                    request.package_size, state.max_frame_len
                )));
            }
            let layout = state.layout(request.package_size)?;

            // A transfer starting at the first chunk replaces the file; a
            // resumed one keeps the chunks before the start sequence.
            let keep = usize::try_from(layout.offset_of(request.start_sequence))
                .unwrap_or(usize::MAX);
            let stored = state.files.entry(request.target.to_string()).or_default();
            stored.truncate(keep);
            layout
        };

        let total = request.data.len() as u64;
        let chunk = layout.payload_per_chunk();
        let mut sequence = request.start_sequence.max(FIRST_DATA_SEQUENCE);
        let mut stored_chunks = 0usize;

        loop {
            let offset = usize::try_from(layout.offset_of(sequence)).unwrap_or(usize::MAX);
            if offset >= request.data.len() {
                break;
            }
            let end = (offset + chunk).min(request.data.len());

            {
                let mut state = self.lock();
                state.require_bound()?;
                if state.fail_upload_after == Some(stored_chunks) {
                    state.fail_upload_after = None;
                    return Err(ProtocolError::TransferFailed(format!(
                        "no acknowledgement for chunk {sequence}"
                    )));
                }
                state
                    .files
                    .entry(request.target.to_string())
                    .or_default()
                    .extend_from_slice(&request.data[offset..end]);
                state.received_sequences.push(sequence);
            }
            trace!(sequence, offset, "Chunk stored");
            stored_chunks += 1;

            progress(TransferProgress {
                sequence,
                bytes_done: end as u64,
                total_bytes: total,
            });

            if !request.package_delay.is_zero() {
                tokio::time::sleep(request.package_delay).await;
            }
            sequence += 1;
        }

        Ok(())
    }

    async fn file_download(
        &mut self,
        path: &str,
        package_size: usize,
        start_sequence: u32,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<Vec<u8>> {
        let state = self.lock();
        state.require_bound()?;
        let layout = state.layout(package_size)?;
        let stored = state.files.get(path).ok_or(ProtocolError::remote(0x42))?;
        let first = start_sequence.max(FIRST_DATA_SEQUENCE);
        let skip = usize::try_from(layout.offset_of(first))
            .unwrap_or(usize::MAX)
            .min(stored.len());
        let total = stored.len() as u64;
        let data = stored[skip..].to_vec();
        drop(state);

        let chunk = layout.payload_per_chunk();
        for (index, piece) in data.chunks(chunk).enumerate() {
            let done = (skip + index * chunk + piece.len()) as u64;
            progress(TransferProgress {
                sequence: first + index as u32,
                bytes_done: done,
                total_bytes: total,
            });
        }
        Ok(data)
    }
}
