//! Tag flags and technologies

use core::ops::{BitOr, BitOrAssign};

/// Bitset describing what was found on a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TagFlags(u8);

impl TagFlags {
    pub const CLEAR: TagFlags = TagFlags(1);
    pub const FORMATTED: TagFlags = TagFlags(2);
    pub const READONLY: TagFlags = TagFlags(4);
    pub const FOREIGN_DATA: TagFlags = TagFlags(8);
    pub const UNKNOWN_PICC: TagFlags = TagFlags(16);
    pub const REMOVED: TagFlags = TagFlags(128);

    /// No flag set
    pub const fn empty() -> Self {
        TagFlags(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if every flag of `other` is set
    pub const fn contains(self, other: TagFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Support classification reported to clients
    pub fn support(self) -> Support {
        if self.contains(TagFlags::FORMATTED) {
            Support::Formatted
        } else if self.contains(TagFlags::FOREIGN_DATA) {
            Support::ForeignData
        } else if self.contains(TagFlags::READONLY) {
            Support::Locked
        } else if self.contains(TagFlags::CLEAR) {
            Support::Empty
        } else {
            Support::Unknown
        }
    }
}

impl BitOr for TagFlags {
    type Output = TagFlags;

    fn bitor(self, rhs: TagFlags) -> TagFlags {
        TagFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TagFlags {
    fn bitor_assign(&mut self, rhs: TagFlags) {
        self.0 |= rhs.0;
    }
}

/// How usable a detected tag is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Support {
    Formatted,
    ForeignData,
    Locked,
    Empty,
    Unknown,
}

impl Support {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Support::Formatted => "formatted",
            Support::ForeignData => "foreign-data",
            Support::Locked => "locked",
            Support::Empty => "empty",
            Support::Unknown => "unknown",
        }
    }
}

/// Radio technology of a tag, numbered as by the NFC reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TagTechnology {
    Iso14443A = 1,
    Iso14443AT2T = 2,
    Iso14443AMifareClassic = 3,
    Iso14443ANfcDep = 4,
    Iso14443AT4T = 6,
    Iso14443AT4TNfcDep = 7,
    Iso14443AT1T = 8,
    Iso14443B = 16,
    St25tb = 17,
}

impl TagTechnology {
    const ALL: [TagTechnology; 9] = [
        TagTechnology::Iso14443A,
        TagTechnology::Iso14443AT2T,
        TagTechnology::Iso14443AMifareClassic,
        TagTechnology::Iso14443ANfcDep,
        TagTechnology::Iso14443AT4T,
        TagTechnology::Iso14443AT4TNfcDep,
        TagTechnology::Iso14443AT1T,
        TagTechnology::Iso14443B,
        TagTechnology::St25tb,
    ];

    /// Technology from the reader's tag type number
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == value)
    }

    /// Lowercase wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            TagTechnology::Iso14443A => "iso14443a",
            TagTechnology::Iso14443AT2T => "iso14443a_t2t",
            TagTechnology::Iso14443AMifareClassic => "iso14443a_mifare_classic",
            TagTechnology::Iso14443ANfcDep => "iso14443a_nfcdep",
            TagTechnology::Iso14443AT4T => "iso14443a_t4t",
            TagTechnology::Iso14443AT4TNfcDep => "iso14443a_t4t_nfcdep",
            TagTechnology::Iso14443AT1T => "iso14443a_t1t",
            TagTechnology::Iso14443B => "iso14443b",
            TagTechnology::St25tb => "st25tb",
        }
    }

    /// Technology from its wire name, case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str().eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_priority() {
        let flags = TagFlags::FORMATTED | TagFlags::READONLY;
        assert_eq!(flags.support(), Support::Formatted);
        assert_eq!((TagFlags::FOREIGN_DATA | TagFlags::READONLY).support(), Support::ForeignData);
        assert_eq!((TagFlags::CLEAR | TagFlags::READONLY).support(), Support::Locked);
        assert_eq!(TagFlags::CLEAR.support(), Support::Empty);
        assert_eq!(TagFlags::UNKNOWN_PICC.support(), Support::Unknown);
        assert_eq!(Support::ForeignData.as_str(), "foreign-data");
    }

    #[test]
    fn test_technology_names() {
        assert_eq!(TagTechnology::from_u8(17), Some(TagTechnology::St25tb));
        assert_eq!(TagTechnology::from_u8(5), None);
        assert_eq!(TagTechnology::from_name("ST25TB"), Some(TagTechnology::St25tb));
        assert_eq!(TagTechnology::Iso14443AT4T.as_str(), "iso14443a_t4t");
    }
}
