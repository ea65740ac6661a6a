//! JRMP framing: the connection handshake and the call header fields.

use bytes::{Buf, BufMut};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use rand::Rng;

use crate::serial::{BlockCursor, CodecError, StreamWriter};
use crate::util::{decode_modified_utf8, put_utf};

pub const MAGIC: &[u8; 4] = b"JRMI";
pub const VERSION: u16 = 2;

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum Protocol {
    Stream = 0x4B,
    SingleOp = 0x4C,
    Multiplex = 0x4D,
}

impl Protocol {
    /// Whether several calls may be in flight on one connection. Only the
    /// multiplex protocol allows it, and no current JDK serves it.
    pub fn supports_multiplexing(self) -> bool {
        self == Protocol::Multiplex
    }
}

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum Acknowledgement {
    ProtocolAck = 0x4E,
    ProtocolNotSupported = 0x4F,
}

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum MessageType {
    Call = 0x50,
    ReturnData = 0x51,
    Ping = 0x52,
    PingAck = 0x53,
    DgcAck = 0x54,
}

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy)]
pub enum ReturnType {
    Normal = 1,
    Exceptional = 2,
}

/// `java.rmi.server.UID`: the address space part of an object identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Uid {
    pub unique: i32,
    pub time: i64,
    pub count: i16,
}

impl Uid {
    pub fn write(&self, out: &mut StreamWriter) {
        out.write_i32(self.unique);
        out.write_i64(self.time);
        out.write_i16(self.count);
    }

    pub fn read(cursor: &mut BlockCursor<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            unique: cursor.read_i32()?,
            time: cursor.read_i64()?,
            count: cursor.read_i16()?,
        })
    }
}

/// `java.rmi.server.ObjID`. Well-known objects use a zero [`Uid`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ObjId {
    pub num: i64,
    pub space: Uid,
}

impl ObjId {
    pub const REGISTRY: ObjId = ObjId::well_known(0);
    pub const ACTIVATOR: ObjId = ObjId::well_known(1);
    pub const DGC: ObjId = ObjId::well_known(2);

    pub const fn well_known(num: i64) -> Self {
        Self {
            num,
            space: Uid {
                unique: 0,
                time: 0,
                count: 0,
            },
        }
    }

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            num: rng.gen(),
            space: Uid {
                unique: rng.gen(),
                time: rng.gen_range(0..i64::MAX),
                count: rng.gen(),
            },
        }
    }

    pub fn write(&self, out: &mut StreamWriter) {
        out.write_i64(self.num);
        self.space.write(out);
    }

    pub fn read(cursor: &mut BlockCursor<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            num: cursor.read_i64()?,
            space: Uid::read(cursor)?,
        })
    }
}

/// Endpoint the server reports back during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub host: String,
    pub port: i32,
}

pub fn client_hello(protocol: Protocol) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7);
    buf.put_slice(MAGIC);
    buf.put_u16(VERSION);
    buf.put_u8(protocol as u8);
    buf
}

/// Parses the server's reply to [`client_hello`], returning it together with
/// the number of bytes consumed.
pub fn parse_server_hello(input: &[u8]) -> Result<(ServerHello, usize), CodecError> {
    let mut buf = input;
    if !buf.has_remaining() {
        return Err(CodecError::Incomplete);
    }
    match Acknowledgement::from_u8(buf.get_u8()) {
        Some(Acknowledgement::ProtocolAck) => {}
        Some(Acknowledgement::ProtocolNotSupported) => {
            return Err(CodecError::InvalidData("protocol not supported"))
        }
        None => return Err(CodecError::InvalidData("not a JRMP endpoint")),
    }
    if buf.remaining() < 2 {
        return Err(CodecError::Incomplete);
    }
    let len = usize::from(buf.get_u16());
    if buf.remaining() < len + 4 {
        return Err(CodecError::Incomplete);
    }
    let host = decode_modified_utf8(&buf[..len]);
    buf.advance(len);
    let port = buf.get_i32();
    Ok((ServerHello { host, port }, input.len() - buf.remaining()))
}

/// The client's own endpoint announcement that completes the handshake. The
/// JDK leaves the port zero.
pub fn client_endpoint(host: &str, port: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(host.len() + 6);
    put_utf(&mut buf, host);
    buf.put_i32(port);
    buf
}
