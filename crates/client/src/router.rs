//! Command router dispatching user commands to the device.
//!
//! Commands come from the command line or, once a session was opened with
//! `open`, from stdin line by line. Both paths parse with the same
//! [`Command`] definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use protocol::{BusConnection, DeviceSession, FileTransferService, ProtocolError, RemoteEntry};
use tracing::{debug, info};

use crate::session::{DeviceInfo, SessionError, TransferReport, TransferSession, EXIT_FAILURE};
use crate::ui::Confirm;

/// Result type for router operations.
pub type RouterResult = Result<CommandOutput, RouterError>;

/// Errors that can occur while routing a command.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A remote path was not absolute.
    #[error("paths on the device must be absolute (e.g. /folder/file.txt): {0}")]
    RelativePath(String),

    /// Session-level failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A file system operation on the device failed.
    #[error(transparent)]
    Device(#[from] ProtocolError),
}

impl RouterError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::RelativePath(_) => EXIT_FAILURE,
            Self::Session(e) => e.exit_code(),
            Self::Device(e) => e.remote_code().unwrap_or(EXIT_FAILURE),
        }
    }
}

/// Commands understood by the client.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Format the file system of the device
    Format,

    /// Check whether a file or directory exists
    Exists {
        /// Path on the device
        path: String,
    },

    /// Rename a file
    Rename {
        /// Current path on the device
        from: String,
        /// New path on the device
        to: String,
    },

    /// Upload a local file
    Upload {
        /// Local file
        local: PathBuf,
        /// Target path on the device
        remote: String,
    },

    /// Download a file from the device
    Download {
        /// Path on the device
        remote: String,
        /// Local target file
        local: PathBuf,
    },

    /// Delete a file
    Delete {
        /// Path on the device
        path: String,
    },

    /// List a directory
    List {
        /// Directory on the device
        path: String,
    },

    /// Create a directory
    Mkdir {
        /// Directory on the device
        path: String,
    },

    /// Delete a directory
    Rmdir {
        /// Directory on the device
        path: String,
    },

    /// Start an interactive session reading commands from stdin
    Open,

    /// End the interactive session
    Close,

    /// Update the firmware (.bin, .gz or .uf2)
    Fwupdate {
        /// Firmware file
        firmware: PathBuf,
    },

    /// Show version and application of the device
    Info,

    /// Show help
    Help,

    /// Show the client version
    Version,
}

/// A command line typed in an interactive session.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_help_subcommand = true)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

/// Parse one line of an interactive session.
pub fn parse_line(line: &str) -> Result<Command, clap::Error> {
    CommandLine::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command)
}

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// The command finished; the message says what was done.
    Done(String),
    /// Result of `exists`.
    Exists { path: String, exists: bool },
    /// Directory entries of `list`.
    Listing { root: String, entries: Vec<RemoteEntry> },
    /// An upload or firmware update finished.
    Transferred(TransferReport),
    /// A download finished.
    Downloaded { local: PathBuf, bytes: u64 },
    /// Result of `info`.
    Info(DeviceInfo),
    /// The caller should print the usage.
    Help,
    /// The client version.
    Version(&'static str),
}

/// The root a listing is printed under, always ending in `/`.
pub fn listing_root(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// One line of a listing.
pub fn listing_line(root: &str, entry: &RemoteEntry) -> String {
    let kind = if entry.is_file { "file" } else { "dir " };
    format!("{kind} {root}{}", entry.name)
}

fn require_absolute(path: &str) -> Result<(), RouterError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(RouterError::RelativePath(path.to_string()))
    }
}

/// Routes commands to a transfer session.
///
/// Outside an interactive session the connection is released after every
/// command. Inside one, only the device session is released between
/// commands and the bus stays connected until `close`.
pub struct CommandRouter<B, D> {
    session: TransferSession<B, D>,
    confirm: Box<dyn Confirm>,
    interactive: bool,
}

impl<B, D> CommandRouter<B, D>
where
    B: BusConnection,
    D: DeviceSession + FileTransferService,
{
    /// Create a new router around `session`.
    pub fn new(session: TransferSession<B, D>, confirm: impl Confirm + 'static) -> Self {
        Self {
            session,
            confirm: Box::new(confirm),
            interactive: false,
        }
    }

    /// Returns `true` between `open` and `close`.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn session(&self) -> &TransferSession<B, D> {
        &self.session
    }

    /// Run one command.
    pub async fn route(&mut self, command: Command) -> RouterResult {
        debug!(?command, "Routing command");
        let result = self.dispatch(command).await;

        if self.interactive {
            self.session.release_device().await;
        } else {
            self.session.close().await;
        }
        result
    }

    /// Open the session and hand out the device.
    async fn device(&mut self) -> Result<&mut D, SessionError> {
        self.session.open().await?;
        Ok(self.session.device_mut())
    }

    async fn dispatch(&mut self, command: Command) -> RouterResult {
        match command {
            Command::Format => {
                self.device().await?.format().await?;
                Ok(CommandOutput::Done("File system formatted".to_string()))
            }
            Command::Exists { path } => {
                require_absolute(&path)?;
                let exists = self.device().await?.exists(&path).await?;
                Ok(CommandOutput::Exists { path, exists })
            }
            Command::Rename { from, to } => {
                require_absolute(&from)?;
                require_absolute(&to)?;
                self.device().await?.rename(&from, &to).await?;
                Ok(CommandOutput::Done(format!("Renamed {from} to {to}")))
            }
            Command::Upload { local, remote } => {
                require_absolute(&remote)?;
                info!(local = %local.display(), remote = %remote, "Uploading file");
                let report = self
                    .session
                    .upload_file(&local, &remote, self.confirm.as_mut())
                    .await?;
                Ok(CommandOutput::Transferred(report))
            }
            Command::Download { remote, local } => {
                require_absolute(&remote)?;
                info!(remote = %remote, local = %local.display(), "Downloading file");
                let bytes = self.session.download_file(&remote, &local).await?;
                Ok(CommandOutput::Downloaded { local, bytes })
            }
            Command::Delete { path } => {
                require_absolute(&path)?;
                self.device().await?.file_delete(&path).await?;
                Ok(CommandOutput::Done(format!("Deleted {path}")))
            }
            Command::List { path } => {
                require_absolute(&path)?;
                let entries = self.device().await?.dir_list(&path).await?;
                Ok(CommandOutput::Listing {
                    root: listing_root(&path),
                    entries,
                })
            }
            Command::Mkdir { path } => {
                require_absolute(&path)?;
                self.device().await?.dir_create(&path).await?;
                Ok(CommandOutput::Done(format!("Created {path}")))
            }
            Command::Rmdir { path } => {
                require_absolute(&path)?;
                self.device().await?.dir_delete(&path).await?;
                Ok(CommandOutput::Done(format!("Deleted {path}")))
            }
            Command::Open => {
                self.session.open().await?;
                self.interactive = true;
                Ok(CommandOutput::Done("Session opened".to_string()))
            }
            Command::Close => {
                self.interactive = false;
                Ok(CommandOutput::Done("Session closed".to_string()))
            }
            Command::Fwupdate { firmware } => {
                info!(firmware = %firmware.display(), "Starting firmware update");
                let report = self
                    .session
                    .firmware_update(&firmware, self.confirm.as_mut())
                    .await?;
                Ok(CommandOutput::Transferred(report))
            }
            Command::Info => Ok(CommandOutput::Info(self.session.device_info().await?)),
            Command::Help => Ok(CommandOutput::Help),
            Command::Version => Ok(CommandOutput::Version(env!("CARGO_PKG_VERSION"))),
        }
    }
}
