//! Encoding and decoding of the controller's 7-byte frame.
//!
//! Frame format:
//! - START (1 byte): 0x3B synchronization byte
//! - DST (1 byte): destination address
//! - ORI (1 byte): origin address
//! - CMD (1 byte): command code
//! - DATA1 (1 byte): register selector
//! - DATA2 (1 byte): register value
//! - CHECKSUM (1 byte): low byte of DST + ORI + CMD + DATA1 + DATA2

use std::fmt;

use crate::{Error, Result};

/// Frame synchronization byte.
pub const FRAME_START: u8 = 0x3B;

/// Size of every frame on the wire.
pub const FRAME_LEN: usize = 7;

/// Destination address the controller uses for frames meant for us.
pub const LISTENER_ADDRESS: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Input was not exactly [`FRAME_LEN`] bytes.
    WrongLength(usize),
    /// First byte was not [`FRAME_START`].
    BadStart(u8),
    /// Trailing byte disagrees with the computed checksum.
    BadChecksum { expected: u8, found: u8 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::WrongLength(len) => write!(f, "expected {FRAME_LEN} bytes, got {len}"),
            FrameError::BadStart(b) => write!(f, "bad start byte 0x{b:02x}"),
            FrameError::BadChecksum { expected, found } => {
                write!(f, "checksum 0x{found:02x}, expected 0x{expected:02x}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// One validated protocol frame. The checksum is derived, so a `Packet`
/// can never hold an inconsistent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    dst: u8,
    ori: u8,
    cmd: u8,
    data1: u8,
    data2: u8,
}

pub fn checksum(dst: u8, ori: u8, cmd: u8, data1: u8, data2: u8) -> u8 {
    dst.wrapping_add(ori)
        .wrapping_add(cmd)
        .wrapping_add(data1)
        .wrapping_add(data2)
}

impl Packet {
    pub const fn new(dst: u8, ori: u8, cmd: u8, data1: u8, data2: u8) -> Self {
        Self {
            dst,
            ori,
            cmd,
            data1,
            data2,
        }
    }

    /// Build a packet from wider integers, rejecting any field that does not
    /// fit in a byte.
    pub fn encode(dst: u32, ori: u32, cmd: u32, data1: u32, data2: u32) -> Result<Self> {
        Ok(Self::new(
            byte("dst", dst)?,
            byte("ori", ori)?,
            byte("cmd", cmd)?,
            byte("data1", data1)?,
            byte("data2", data2)?,
        ))
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, FrameError> {
        let frame: &[u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::WrongLength(bytes.len()))?;

        let [start, dst, ori, cmd, data1, data2, found] = *frame;
        if start != FRAME_START {
            return Err(FrameError::BadStart(start));
        }
        let expected = checksum(dst, ori, cmd, data1, data2);
        if found != expected {
            return Err(FrameError::BadChecksum { expected, found });
        }
        Ok(Self::new(dst, ori, cmd, data1, data2))
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        [
            FRAME_START,
            self.dst,
            self.ori,
            self.cmd,
            self.data1,
            self.data2,
            self.checksum(),
        ]
    }

    pub fn dst(&self) -> u8 {
        self.dst
    }

    pub fn ori(&self) -> u8 {
        self.ori
    }

    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> u8 {
        self.data2
    }

    pub fn checksum(&self) -> u8 {
        checksum(self.dst, self.ori, self.cmd, self.data1, self.data2)
    }

    /// True when the controller addressed this frame to our listener.
    pub fn is_for_listener(&self) -> bool {
        self.dst == LISTENER_ADDRESS
    }
}

/// Decoding for callers working in the crate's [`Error`] type.
impl TryFrom<&[u8]> for Packet {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Ok(Packet::decode(bytes)?)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dst:{} ori:{} cmd:{} data1:{} data2:{}",
            self.dst, self.ori, self.cmd, self.data1, self.data2
        )
    }
}

fn byte(field: &'static str, value: u32) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::Encoding {
        field,
        value: value.into(),
    })
}
