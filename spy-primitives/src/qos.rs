//! Quality-of-service levels.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Delivery guarantee a message was published with.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// Level 0: fire and forget.
    #[default]
    AtMostOnce,
    /// Level 1: acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Level 2: four-way handshake, no duplicates.
    ExactlyOnce,
}

impl Qos {
    /// Returns the numeric level (0, 1 or 2).
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(Error::InvalidQos { level }),
        }
    }
}

impl From<Qos> for u8 {
    fn from(value: Qos) -> Self {
        value.level()
    }
}

impl Display for Qos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}
