use std::fmt;
use std::str::FromStr;

use tracing::trace;

/// A 64-bit Xbox user id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Xuid(pub u64);

impl Xuid {
    const OFFLINE_PREFIX: u64 = 0xe03 << 52;

    /// Placeholder id used by profiles that were never assigned one.
    pub const DEFAULT: Self = Self(0xb13e_babe_babe_babe);

    pub fn generate_offline() -> Self {
        let random = rand::random::<u32>() & 0x7fff_ffff;
        Self(Self::OFFLINE_PREFIX | random as u64)
    }

    pub fn is_offline(self) -> bool {
        self.0 & 0xf000_0000_0000_0000 == 0xe000_0000_0000_0000 || self == Self::DEFAULT
    }

    pub fn is_online(self) -> bool {
        self.0 & 0xffff_0000_0000_0000 == 0x0009_0000_0000_0000
    }

    pub fn is_team(self) -> bool {
        self.0 & 0xff00_0000_0000_0000 == 0xfe00_0000_0000_0000
    }

    pub fn is_valid(self) -> bool {
        self.is_offline() != self.is_online()
    }

    /// Stricter than [`Xuid::is_valid`]: rejects zero, team ids and offline
    /// ids without any random bits.
    pub fn is_valid_format(self) -> bool {
        let v = self.0;
        if v == 0 {
            return false;
        }
        if self == Self::DEFAULT {
            return true;
        }
        if self.is_team() {
            trace!("{self} is a team id");
            return false;
        }

        let offline = v & 0xf000_0000_0000_0000 == 0xe000_0000_0000_0000;
        if offline == self.is_online() {
            return false;
        }

        !(offline && v & 0x7fff_ffff == 0)
    }

    /// Whether `s` is a 16-digit hex id that passes [`Xuid::is_valid_format`].
    pub fn is_valid_hex(s: &str) -> bool {
        s.parse::<Self>().is_ok_and(Self::is_valid_format)
    }
}

impl fmt::Display for Xuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid XUID {0:?}, expected 16 hex digits")]
pub struct ParseXuidError(String);

impl FromStr for Xuid {
    type Err = ParseXuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(ParseXuidError(s.to_owned()));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ParseXuidError(s.to_owned()))
    }
}

impl From<u64> for Xuid {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<Xuid> for u64 {
    fn from(x: Xuid) -> Self {
        x.0
    }
}
