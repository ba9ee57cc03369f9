//! Contracts of the bus transport and the device file transfer service.
//!
//! The field bus stack lives outside this workspace. These traits describe
//! the surface the client consumes from it: a bus connection, a bound device
//! session with property and function access, and the file transfer service
//! running on the device. All calls are request/response; an implementation
//! must not start the next request before the previous one was answered.

use std::time::Duration;

use crate::error::Result;

/// Metadata the device reports for a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteFileInfo {
    /// Stored size in bytes.
    pub size: u64,
    /// CRC32 over the stored bytes.
    pub crc32: u32,
}

/// Entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_file: bool,
}

/// Progress of a running upload or download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Sequence number of the chunk just acknowledged.
    pub sequence: u32,
    /// Bytes stored remotely, including bytes from earlier sessions.
    pub bytes_done: u64,
    /// Total bytes of the transfer.
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completion in percent, 0 to 100.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.bytes_done.min(self.total_bytes) * 100 / self.total_bytes) as u8
    }
}

/// Parameters of a chunked upload.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    /// Complete file content; chunks before `start_sequence` are not sent.
    pub data: &'a [u8],
    /// Absolute target path on the device.
    pub target: &'a str,
    /// Size of one package including the chunk header.
    pub package_size: usize,
    /// First data chunk to send (1 sends everything).
    pub start_sequence: u32,
    /// Pause between two packages.
    pub package_delay: Duration,
}

/// A connection to the field bus through a gateway.
#[allow(async_fn_in_trait)]
pub trait BusConnection {
    /// Opens the connection to the gateway.
    async fn connect(&mut self) -> Result<()>;

    /// Closes the connection to the gateway.
    async fn disconnect(&mut self) -> Result<()>;
}

/// A connection-oriented session with one device on the bus.
#[allow(async_fn_in_trait)]
pub trait DeviceSession {
    /// Binds the device session.
    ///
    /// # Returns
    /// The maximum frame length negotiated with the device.
    async fn bind(&mut self) -> Result<usize>;

    /// Releases the device session.
    async fn unbind(&mut self) -> Result<()>;

    /// Reads a property value.
    async fn property_read(&mut self, object_index: u8, property_id: u8) -> Result<Vec<u8>>;

    /// Writes a property value.
    async fn property_write(&mut self, object_index: u8, property_id: u8, data: &[u8]) -> Result<()>;

    /// Invokes a function property and returns its response payload.
    async fn invoke_function(&mut self, object_index: u8, function_id: u8, data: &[u8]) -> Result<Vec<u8>>;
}

/// The file transfer service of a bound device.
#[allow(async_fn_in_trait)]
pub trait FileTransferService {
    /// Returns the version string of the service on the device.
    async fn check_version(&mut self) -> Result<String>;

    /// Returns `true` if the device can report file size and CRC32, which
    /// resuming an interrupted upload requires.
    async fn supports_resume(&mut self) -> Result<bool>;

    /// Formats the device file system.
    async fn format(&mut self) -> Result<()>;

    async fn exists(&mut self, path: &str) -> Result<bool>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    async fn file_delete(&mut self, path: &str) -> Result<()>;

    /// Returns size and CRC32 of a stored file.
    async fn file_info(&mut self, path: &str) -> Result<RemoteFileInfo>;

    async fn dir_list(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    async fn dir_create(&mut self, path: &str) -> Result<()>;

    async fn dir_delete(&mut self, path: &str) -> Result<()>;

    /// Sends a file chunk by chunk, waiting for each acknowledgement.
    async fn file_upload(
        &mut self,
        request: UploadRequest<'_>,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<()>;

    /// Reads a file from the chunk `start_sequence` to its end.
    ///
    /// [`FIRST_DATA_SEQUENCE`](crate::framing::FIRST_DATA_SEQUENCE) reads the
    /// whole file.
    async fn file_download(
        &mut self,
        path: &str,
        package_size: usize,
        start_sequence: u32,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<Vec<u8>>;
}
