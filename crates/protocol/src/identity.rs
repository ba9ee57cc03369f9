//! Application identity of KNX firmware and devices.
//!
//! Both a firmware container (through its KNX application tag) and a running
//! device (through a property read) describe the application they carry with
//! the same four bytes.

use std::fmt;

use crate::container::{Tag, TagType};
use crate::error::{ProtocolError, Result};

/// Interface object holding the application identity.
pub const IDENTITY_OBJECT_INDEX: u8 = 0;

/// Property id of the application identity (hardware type).
pub const IDENTITY_PROPERTY_ID: u8 = 78;

/// Offset of the identity bytes in the property response.
const PROPERTY_IDENTITY_OFFSET: usize = 2;

/// Identity of a KNX application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApplicationIdentity {
    pub open_knx_id: u8,
    pub app_number: u8,
    /// Major version in the high nibble, minor version in the low nibble.
    pub app_version: u8,
    pub app_revision: u8,
}

impl ApplicationIdentity {
    fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [open_knx_id, app_number, app_version, app_revision, ..] => Some(Self {
                open_knx_id: *open_knx_id,
                app_number: *app_number,
                app_version: *app_version,
                app_revision: *app_revision,
            }),
            _ => None,
        }
    }

    /// Read the identity from a KNX application tag of a container.
    pub fn from_tag(tag: &Tag) -> Result<Self> {
        if !tag.is(TagType::KnxApplication) {
            return Err(ProtocolError::InvalidResponse(format!(
                "tag {:#08x} is not an application tag",
                tag.tag_type
            )));
        }
        Self::from_slice(&tag.data).ok_or_else(|| {
            ProtocolError::InvalidResponse(format!(
                "application tag too short: {} bytes",
                tag.data.len()
            ))
        })
    }

    /// Read the identity from the response to a hardware type property read.
    pub fn from_property(response: &[u8]) -> Result<Self> {
        response
            .get(PROPERTY_IDENTITY_OFFSET..)
            .and_then(Self::from_slice)
            .ok_or_else(|| {
                ProtocolError::InvalidResponse(format!(
                    "hardware type response too short: {} bytes",
                    response.len()
                ))
            })
    }

    /// Combined OpenKNX id and application number.
    pub fn application_id(&self) -> u16 {
        u16::from(self.open_knx_id) << 8 | u16::from(self.app_number)
    }

    /// Major part of the application version.
    pub fn major(&self) -> u8 {
        self.app_version >> 4
    }

    /// Minor part of the application version.
    pub fn minor(&self) -> u8 {
        self.app_version & 0x0f
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X} {}.{}.{}",
            self.application_id(),
            self.major(),
            self.minor(),
            self.app_revision
        )
    }
}
