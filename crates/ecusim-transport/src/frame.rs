//! Bus frame value type

use bytes::Bytes;
use thiserror::Error;

/// Maximum data length of a classic CAN frame
pub const CLASSIC_MAX_DATA: usize = 8;
/// Maximum data length of a CAN FD frame
pub const FD_MAX_DATA: usize = 64;

const STANDARD_ID_MAX: u32 = 0x7FF;
const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// Identifier format of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameFormat {
    /// 11-bit identifier
    #[default]
    Standard,
    /// 29-bit identifier
    Extended,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("identifier 0x{id:X} out of range for {format:?} format")]
    IdOutOfRange { id: u32, format: FrameFormat },

    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLong { len: usize, max: usize },
}

/// A single bus frame. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    id: u32,
    data: Bytes,
    format: FrameFormat,
}

impl Frame {
    pub fn new(id: u32, data: impl Into<Bytes>, format: FrameFormat) -> Result<Self, FrameError> {
        let max_id = match format {
            FrameFormat::Standard => STANDARD_ID_MAX,
            FrameFormat::Extended => EXTENDED_ID_MAX,
        };
        if id > max_id {
            return Err(FrameError::IdOutOfRange { id, format });
        }

        let data = data.into();
        if data.len() > FD_MAX_DATA {
            return Err(FrameError::PayloadTooLong {
                len: data.len(),
                max: FD_MAX_DATA,
            });
        }

        Ok(Self { id, data, format })
    }

    /// Frame with an 11-bit identifier
    pub fn standard(id: u32, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(id, data, FrameFormat::Standard)
    }

    /// Frame with a 29-bit identifier
    pub fn extended(id: u32, data: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(id, data, FrameFormat::Extended)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn is_extended(&self) -> bool {
        self.format == FrameFormat::Extended
    }

    /// Whether the payload needs a CAN FD frame
    pub fn is_fd(&self) -> bool {
        self.data.len() > CLASSIC_MAX_DATA
    }
}
