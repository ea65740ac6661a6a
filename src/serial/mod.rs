//! Java object serialization, as far as RMI calls need it.
//!
//! Calls and replies on a JRMP connection are `ObjectOutputStream` streams.
//! [`StreamWriter`] produces them from explicit class descriptions, and
//! [`StreamReader`] parses whatever the remote side sends back into a
//! [`Content`] tree without needing any class definitions.

use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

pub mod objects;
pub mod reader;
pub mod writer;

pub use objects::{JavaValue, RefTarget};
pub use reader::{
    Array, BlockCursor, ClassData, ClassDesc, Content, FieldDesc, Handles, Object, StreamReader,
    Value,
};
pub use writer::{ClassSpec, FieldSpec, StreamWriter};

pub const STREAM_MAGIC: u16 = 0xACED;
pub const STREAM_VERSION: u16 = 5;
pub const BASE_HANDLE: u32 = 0x7E_0000;

pub const SC_WRITE_METHOD: u8 = 0x01;
pub const SC_SERIALIZABLE: u8 = 0x02;
pub const SC_EXTERNALIZABLE: u8 = 0x04;
pub const SC_BLOCK_DATA: u8 = 0x08;
pub const SC_ENUM: u8 = 0x10;

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum TypeCode {
    Null = 0x70,
    Reference = 0x71,
    ClassDesc = 0x72,
    Object = 0x73,
    String = 0x74,
    Array = 0x75,
    Class = 0x76,
    BlockData = 0x77,
    EndBlockData = 0x78,
    Reset = 0x79,
    BlockDataLong = 0x7A,
    Exception = 0x7B,
    LongString = 0x7C,
    ProxyClassDesc = 0x7D,
    Enum = 0x7E,
}

impl TypeCode {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("unexpected end of input")]
    Incomplete,
    #[error("invalid stream header")]
    BadHeader,
    #[error("unknown type code: {0:#04x}")]
    UnknownTypeCode(u8),
    #[error("invalid handle: {0:#x}")]
    BadHandle(u32),
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}
