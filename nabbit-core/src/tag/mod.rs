//! Contactless tag model
//!
//! Tags are ST25TB-family memories read in 4-byte blocks. Formatted tags
//! carry a two-byte signature, a picture id and an application id in block
//! 7, followed by up to 32 bytes of application data.

pub mod apps;
pub mod flags;
pub mod layout;

pub use apps::{app_id, app_name, APP_NONE};
pub use flags::{Support, TagFlags, TagTechnology};
pub use layout::{decode_blocks, encode_write, is_compatible, is_locked, Decoded, TagLayoutError, Uid, WritePlan};

use heapless::Vec;

/// Maximum application data on a tag
pub const MAX_APP_DATA: usize = 32;

/// Application data read from or written to a tag
pub type AppData = Vec<u8, MAX_APP_DATA>;

/// What the reader found for one presentation of a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSnapshot {
    pub tech: TagTechnology,
    pub uid: Uid,
    /// Picture id, for formatted tags
    pub picture: Option<u8>,
    /// Application id, for formatted tags
    pub app: Option<u8>,
    /// Raw application data, for formatted tags
    pub data: Option<AppData>,
    pub flags: TagFlags,
}

impl TagSnapshot {
    /// Snapshot of a tag that could not be read
    pub fn unreadable(tech: TagTechnology, uid: Uid) -> Self {
        Self {
            tech,
            uid,
            picture: None,
            app: None,
            data: None,
            flags: TagFlags::UNKNOWN_PICC,
        }
    }

    /// Take the content of a fresh read
    pub fn apply(&mut self, decoded: Decoded) {
        self.picture = decoded.picture;
        self.app = decoded.app;
        self.data = decoded.data;
        self.flags = decoded.flags;
    }

    /// Removal notice carrying the identity of the last snapshot
    pub fn removed(&self) -> Self {
        Self {
            tech: self.tech,
            uid: self.uid.clone(),
            picture: self.picture,
            app: self.app,
            data: None,
            flags: TagFlags::REMOVED,
        }
    }

    /// Application data up to the first `0xFF` terminator
    pub fn data_text(&self) -> Option<&[u8]> {
        let data = self.data.as_ref()?;
        let end = data.iter().position(|&b| b == 0xFF).unwrap_or(data.len());
        Some(&data[..end])
    }
}
