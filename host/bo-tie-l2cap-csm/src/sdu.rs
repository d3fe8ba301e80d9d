//! Credit Based SDU Segmentation and Recombination
//!
//! A service data unit (SDU) sent over a credit based channel is split into credit based frames
//! (k-frames). The first k-frame of a SDU starts with the two byte *SDU length* field, the
//! remaining k-frames only carry payload. The information payload of every k-frame (including
//! the SDU length field) is at most the MPS of the channel.

use alloc::vec::Vec;
use core::fmt;

/// The maximum size of a SDU
pub const MAX_SDU_SIZE: usize = 65533;

const SDU_LENGTH_FIELD_SIZE: usize = 2;

/// Error for segmenting a SDU
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SegmentError {
    SduLargerThanMtu { len: usize, mtu: u16 },
    MpsTooSmall,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SegmentError::SduLargerThanMtu { len, mtu } => {
                write!(f, "SDU of {len} bytes is larger than the peer's MTU of {mtu}")
            }
            SegmentError::MpsTooSmall => f.write_str("the MPS cannot contain the SDU length field"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SegmentError {}

/// Segment a SDU into the payloads of k-frames
///
/// `mtu` and `mps` are the MTU and MPS of the peer.
pub fn segment(sdu: &[u8], mtu: u16, mps: u16) -> Result<Vec<Vec<u8>>, SegmentError> {
    if sdu.len() > usize::from(mtu) || sdu.len() > MAX_SDU_SIZE {
        return Err(SegmentError::SduLargerThanMtu { len: sdu.len(), mtu });
    }

    let mps = usize::from(mps);

    if mps <= SDU_LENGTH_FIELD_SIZE {
        return Err(SegmentError::MpsTooSmall);
    }

    let first_len = core::cmp::min(sdu.len(), mps - SDU_LENGTH_FIELD_SIZE);

    let mut first = Vec::with_capacity(SDU_LENGTH_FIELD_SIZE + first_len);

    first.extend_from_slice(&(sdu.len() as u16).to_le_bytes());

    first.extend_from_slice(&sdu[..first_len]);

    let mut frames = alloc::vec![first];

    frames.extend(sdu[first_len..].chunks(mps).map(|chunk| chunk.to_vec()));

    Ok(frames)
}

/// Credit based SDU recombination error
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecombineError {
    MissingSduLength,
    PayloadLargerThanMps,
    SduLargerThanMtu,
    /// More bytes were received than stated in the SDU length field
    SduOverrun,
}

impl fmt::Display for RecombineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecombineError::MissingSduLength => f.write_str("credit based frame does not contain a SDU length field"),
            RecombineError::PayloadLargerThanMps => {
                f.write_str("received credit based frame larger than the agreed upon MPS")
            }
            RecombineError::SduLargerThanMtu => f.write_str("SDU length field is larger than the agreed upon MTU"),
            RecombineError::SduOverrun => f.write_str("credit based frames contain more bytes than the SDU length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RecombineError {}

/// A recombiner of k-frames into a SDU
///
/// `mtu` and `mps` are the values of this device. A recombiner is reset after every error, the
/// next k-frame is expected to be the first k-frame of a new SDU.
#[derive(Debug)]
pub struct SduRecombiner {
    mtu: u16,
    mps: u16,
    sdu_len: Option<usize>,
    buffer: Vec<u8>,
}

impl SduRecombiner {
    pub fn new(mtu: u16, mps: u16) -> Self {
        SduRecombiner {
            mtu,
            mps,
            sdu_len: None,
            buffer: Vec::new(),
        }
    }

    /// Change the MTU and MPS
    ///
    /// A partially recombined SDU is kept.
    pub fn set_limits(&mut self, mtu: u16, mps: u16) {
        self.mtu = mtu;
        self.mps = mps;
    }

    /// Check if part of a SDU has been received
    pub fn is_in_progress(&self) -> bool {
        self.sdu_len.is_some()
    }

    /// Add the payload of a k-frame
    ///
    /// The SDU is returned once the last k-frame of it is added.
    pub fn add(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, RecombineError> {
        let result = self.try_add(payload);

        if result.is_err() {
            self.sdu_len = None;
            self.buffer.clear();
        }

        result
    }

    fn try_add(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>, RecombineError> {
        if payload.len() > usize::from(self.mps) {
            return Err(RecombineError::PayloadLargerThanMps);
        }

        let data = match self.sdu_len {
            Some(_) => payload,
            None => {
                let [low, high, data @ ..] = payload else {
                    return Err(RecombineError::MissingSduLength);
                };

                let sdu_len = usize::from(u16::from_le_bytes([*low, *high]));

                if sdu_len > usize::from(self.mtu) {
                    return Err(RecombineError::SduLargerThanMtu);
                }

                self.sdu_len = Some(sdu_len);

                data
            }
        };

        let sdu_len = self.sdu_len.unwrap_or_default();

        if self.buffer.len() + data.len() > sdu_len {
            return Err(RecombineError::SduOverrun);
        }

        self.buffer.extend_from_slice(data);

        if self.buffer.len() == sdu_len {
            self.sdu_len = None;

            Ok(Some(core::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }
}
