//! Block layout of formatted tags
//!
//! Blocks 7 to 15 hold user data, block 255 is the system block carrying
//! the lock bits. Blocks are little-endian on the wire; the signature block
//! reads `N`, `b`, picture, app once reversed.

use core::fmt;

use heapless::Vec;

use super::flags::TagFlags;
use super::{AppData, MAX_APP_DATA};

/// Signature marking a formatted tag
pub const SIGNATURE: [u8; 2] = *b"Nb";

/// Blocks read on detection: user blocks then the system block
pub const READ_BLOCKS: [u8; 10] = [7, 8, 9, 10, 11, 12, 13, 14, 15, 255];

/// First user block
pub const FIRST_USER_BLOCK: u8 = 7;

/// Block size in bytes
pub const BLOCK_SIZE: usize = 4;

/// Bytes returned by a read of [`READ_BLOCKS`]
pub const READ_LEN: usize = READ_BLOCKS.len() * BLOCK_SIZE;

const USER_LEN: usize = (READ_BLOCKS.len() - 1) * BLOCK_SIZE;

/// Maximum UID length in bytes
pub const MAX_UID_LEN: usize = 10;

/// Errors decoding or encoding tag data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TagLayoutError {
    /// Read returned fewer bytes than the block list
    ShortRead,
    /// Application data longer than 32 bytes
    DataTooLong,
    /// UID string is not colon-separated hex
    InvalidUid,
}

impl fmt::Display for TagLayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagLayoutError::ShortRead => f.write_str("short tag read"),
            TagLayoutError::DataTooLong => f.write_str("tag data exceeds 32 bytes"),
            TagLayoutError::InvalidUid => f.write_str("invalid tag uid"),
        }
    }
}

/// Tag UID, most significant byte first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uid(Vec<u8, MAX_UID_LEN>);

impl Uid {
    /// UID from big-endian bytes; longer input is truncated
    pub fn from_be(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_UID_LEN);
        let mut v = Vec::new();
        let _ = v.extend_from_slice(&bytes[..len]);
        Uid(v)
    }

    /// UID from the little-endian bytes the readers transmit
    pub fn from_le(bytes: &[u8]) -> Self {
        let mut uid = Self::from_be(bytes);
        uid.0.reverse();
        uid
    }

    /// Parse `aa:bb:cc` (colons optional)
    pub fn parse(s: &str) -> Result<Self, TagLayoutError> {
        let hex: Vec<u8, { MAX_UID_LEN * 2 }> = s
            .bytes()
            .filter(|b| *b != b':')
            .try_fold(Vec::new(), |mut acc, b| {
                acc.push(b).map_err(|_| TagLayoutError::InvalidUid)?;
                Ok::<_, TagLayoutError>(acc)
            })?;
        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(TagLayoutError::InvalidUid);
        }
        let mut out = Vec::new();
        for pair in hex.chunks(2) {
            let digits = core::str::from_utf8(pair).map_err(|_| TagLayoutError::InvalidUid)?;
            let byte = u8::from_str_radix(digits, 16).map_err(|_| TagLayoutError::InvalidUid)?;
            out.push(byte).map_err(|_| TagLayoutError::InvalidUid)?;
        }
        Ok(Uid(out))
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Little-endian bytes, as sent to the readers
    pub fn to_le(&self) -> Vec<u8, MAX_UID_LEN> {
        let mut v = self.0.clone();
        v.reverse();
        v
    }

    /// Check if the UID is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Check if a UID belongs to a supported STMicroelectronics memory
///
/// SRI512, SRT512, SRI4K, SRIX4K and SRIX2K.
pub fn is_compatible(uid: &Uid) -> bool {
    let b = uid.as_bytes();
    if b.len() < 3 || b[0] != 0xD0 || b[1] != 0x02 {
        return false;
    }
    matches!(b[2] & 0xFC, 0x18 | 0x30 | 0x1C | 0x0C | 0x3C)
}

/// Check the lock bits of the system block
pub fn is_locked(system_block_le: [u8; 4]) -> bool {
    u32::from_le_bytes(system_block_le) & 0xFF80_0000 != 0xFF80_0000
}

/// Decoded content of the user blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub picture: Option<u8>,
    pub app: Option<u8>,
    pub data: Option<AppData>,
    pub flags: TagFlags,
}

/// Decode the bytes returned by a read of [`READ_BLOCKS`]
pub fn decode_blocks(data: &[u8]) -> Result<Decoded, TagLayoutError> {
    if data.len() < READ_LEN {
        return Err(TagLayoutError::ShortRead);
    }
    let mut flags = TagFlags::empty();
    let system = [data[USER_LEN], data[USER_LEN + 1], data[USER_LEN + 2], data[USER_LEN + 3]];
    if is_locked(system) {
        flags |= TagFlags::READONLY;
    }

    // First block, reversed
    let first = [data[3], data[2], data[1], data[0]];
    if first[..2] == SIGNATURE {
        let mut app_data = AppData::new();
        let _ = app_data.extend_from_slice(&data[BLOCK_SIZE..USER_LEN]);
        flags |= TagFlags::FORMATTED;
        return Ok(Decoded {
            picture: Some(first[2]),
            app: Some(first[3]),
            data: Some(app_data),
            flags,
        });
    }

    if data[..USER_LEN].iter().any(|&b| b != 0xFF) {
        flags |= TagFlags::FOREIGN_DATA;
    } else {
        flags |= TagFlags::CLEAR;
    }
    Ok(Decoded {
        picture: None,
        app: None,
        data: None,
        flags,
    })
}

/// Blocks and bytes of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    /// Block indices, starting at [`FIRST_USER_BLOCK`]
    pub blocks: Vec<u8, 9>,
    /// Bytes to write, 4 per block, signature block first
    pub bytes: Vec<u8, USER_LEN>,
}

impl WritePlan {
    /// Bytes destined to one block of the plan
    pub fn block_bytes(&self, i: usize) -> &[u8] {
        &self.bytes[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE]
    }

    /// What a read of an unlocked tag returns once the plan is written
    pub fn contents(&self) -> Decoded {
        let mut image = [0xFF; READ_LEN];
        image[..self.bytes.len()].copy_from_slice(&self.bytes);
        match decode_blocks(&image) {
            Ok(decoded) => decoded,
            // The image always has READ_LEN bytes
            Err(_) => Decoded {
                picture: None,
                app: None,
                data: None,
                flags: TagFlags::UNKNOWN_PICC,
            },
        }
    }
}

/// Lay out a formatted tag
///
/// Data shorter than 32 bytes gets a `0xFF` terminator; everything is padded
/// with `0xFF` to a block boundary. Empty data writes one blank block.
pub fn encode_write(picture: u8, app: u8, data: &[u8]) -> Result<WritePlan, TagLayoutError> {
    if data.len() > MAX_APP_DATA {
        return Err(TagLayoutError::DataTooLong);
    }
    let mut bytes: Vec<u8, USER_LEN> = Vec::new();
    let first = [app, picture, SIGNATURE[1], SIGNATURE[0]];
    let _ = bytes.extend_from_slice(&first);

    if data.is_empty() {
        let _ = bytes.extend_from_slice(&[0xFF; BLOCK_SIZE]);
    } else {
        let _ = bytes.extend_from_slice(data);
        if data.len() < MAX_APP_DATA {
            let _ = bytes.push(0xFF);
        }
        while bytes.len() % BLOCK_SIZE != 0 {
            let _ = bytes.push(0xFF);
        }
    }

    let count = bytes.len() / BLOCK_SIZE;
    let blocks = (0..count as u8).map(|i| FIRST_USER_BLOCK + i).collect();
    Ok(WritePlan { blocks, bytes })
}
