//! # KnxFtp Client Library
//!
//! File system access and resumable firmware updates for devices on the
//! KNX bus.
//!
//! ## Overview
//!
//! - **Stream normalization**: `.bin`, `.gz` and `.uf2` inputs become one
//!   gzip stream for the device
//! - **Compatibility gate**: firmware for another application, the same
//!   version or an older one is only flashed after confirmation
//! - **Resume planning**: interrupted uploads continue at the first chunk
//!   the device does not hold yet
//! - **Transfer sessions**: connection handling, upload, verification and
//!   restart as one state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Command Router                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                       Transfer Session                       │
//! │  ┌──────────────┐  ┌───────────────────┐  ┌──────────────┐   │
//! │  │  Normalizer  │  │ Compatibility Gate│  │Resume Planner│   │
//! │  └──────────────┘  └───────────────────┘  └──────────────┘   │
//! ├──────────────────────────────────────────────────────────────┤
//! │   BusConnection / DeviceSession / FileTransferService        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use client::session::{SessionOptions, TransferSession};
//! use client::ui::FixedAnswer;
//! use client::virtual_device::VirtualDevice;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::SessionError> {
//!     let device = VirtualDevice::new();
//!     let mut session = TransferSession::new(device.clone(), device, SessionOptions::default());
//!
//!     // Decline every compatibility question
//!     let mut confirm = FixedAnswer::new(false);
//!     let report = session
//!         .firmware_update(Path::new("firmware.uf2"), &mut confirm)
//!         .await?;
//!     println!("sent {} bytes", report.bytes_sent);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Stream normalization and resume planning
//! - [`update`]: Compatibility gate for firmware updates
//! - [`session`]: Transfer session state machine
//! - [`router`]: Command parsing and dispatch
//! - [`ui`]: Console output and prompts
//! - [`virtual_device`]: In-memory device

pub mod config;
pub mod files;
pub mod router;
pub mod session;
pub mod ui;
pub mod update;
pub mod virtual_device;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError, ConnectionKind};

// Re-export files types for convenience
pub use files::{normalize, InputFormat, NormalizedStream, ResumePlanner, TransferPlan};

// Re-export gate types for convenience
pub use update::{Classification, GateDecision};

// Re-export session types for convenience
pub use session::{
    SessionError, SessionOptions, TransferEvent, TransferObserver, TransferReport, TransferSession,
    TransferState,
};

// Re-export router types for convenience
pub use router::{parse_line, Command, CommandOutput, CommandRouter, RouterError, RouterResult};

// Re-export UI types for convenience
pub use ui::{Confirm, ConsoleObserver, ConsolePrompt};

pub use virtual_device::VirtualDevice;
