//! KNX individual addresses (`area.line.device`).

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Individual address of a bus participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndividualAddress {
    area: u8,
    line: u8,
    device: u8,
}

impl IndividualAddress {
    /// Create an address, checking the 4-bit area and line ranges.
    pub fn new(area: u8, line: u8, device: u8) -> Option<Self> {
        (area <= 15 && line <= 15).then_some(Self { area, line, device })
    }

    pub fn area(&self) -> u8 {
        self.area
    }

    pub fn line(&self) -> u8 {
        self.line
    }

    pub fn device(&self) -> u8 {
        self.device
    }

    /// Source address used for routing when none is configured.
    ///
    /// Taken from the line below the gateway: the line is decremented, or the
    /// area when the gateway sits on line 0, with device 255.
    pub fn routing_source_for(gateway: &IndividualAddress) -> Self {
        let (area, line) = if gateway.line == 0 {
            (gateway.area.wrapping_sub(1) & 0x0f, gateway.line)
        } else {
            (gateway.area, gateway.line - 1)
        };
        Self {
            area,
            line,
            device: 255,
        }
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area, self.line, self.device)
    }
}

impl FromStr for IndividualAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidAddress(format!("{s:?}"));

        let mut parts = s.trim().split('.');
        let (Some(area), Some(line), Some(device), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let area = area.parse::<u8>().map_err(|_| invalid())?;
        let line = line.parse::<u8>().map_err(|_| invalid())?;
        let device = device.parse::<u8>().map_err(|_| invalid())?;
        Self::new(area, line, device).ok_or_else(invalid)
    }
}
