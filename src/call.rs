//! Call messages and the raw invoke primitive.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::candidate::{Primitive, TypeDesc};
use crate::error::{RmgError, SessionError};
use crate::protocol::{MessageType, ObjId};
use crate::response::ResponseClass;
use crate::serial::{JavaValue, StreamWriter};
use crate::session::{ReturnKind, Session};

/// Which method a call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// JDK 1.2+ dispatch: operation -1 and the method hash.
    Method { hash: i64 },
    /// Stub/skeleton dispatch: an operation number and the interface hash.
    Legacy { op: i32, interface_hash: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Modern,
    Legacy,
}

impl Selector {
    pub fn mode(&self) -> DispatchMode {
        match self {
            Selector::Method { .. } => DispatchMode::Modern,
            Selector::Legacy { .. } => DispatchMode::Legacy,
        }
    }

    /// The `(op, hash)` pair as written into the call header.
    pub fn wire(&self) -> (i32, i64) {
        match *self {
            Selector::Method { hash } => (-1, hash),
            Selector::Legacy { op, interface_hash } => (op, interface_hash),
        }
    }
}

const MODERN_ONLY: &[DispatchMode] = &[DispatchMode::Modern];
const LEGACY_ONLY: &[DispatchMode] = &[DispatchMode::Legacy];
const MODERN_THEN_LEGACY: &[DispatchMode] = &[DispatchMode::Modern, DispatchMode::Legacy];

/// When to use legacy dispatch for guessed objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyMode {
    /// Method hash dispatch. A generated `_Stub` object that rejects the
    /// method hash as unknown is asked again with legacy dispatch.
    #[default]
    Auto,
    Force,
    Never,
}

impl LegacyMode {
    /// Dispatch modes to try on an object of class `class_name`, in order.
    /// A later mode is only tried when the earlier one was rejected as an
    /// unknown method.
    pub fn dispatch_order(self, class_name: Option<&str>) -> &'static [DispatchMode] {
        match self {
            LegacyMode::Auto if class_name.map_or(false, |name| name.ends_with("_Stub")) => {
                MODERN_THEN_LEGACY
            }
            LegacyMode::Auto | LegacyMode::Never => MODERN_ONLY,
            LegacyMode::Force => LEGACY_ONLY,
        }
    }
}

impl FromStr for LegacyMode {
    type Err = RmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(LegacyMode::Auto),
            "force" => Ok(LegacyMode::Force),
            "never" => Ok(LegacyMode::Never),
            _ => Err(RmgError::invalid_input(format!(
                "legacy mode '{}' is not one of auto, force, never",
                s
            ))),
        }
    }
}

/// One call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A neutral value of the given type: zero, null or an empty array.
    Placeholder(TypeDesc),
    Value(JavaValue),
}

impl Argument {
    pub fn write(&self, out: &mut StreamWriter) {
        match self {
            Argument::Placeholder(TypeDesc::Primitive(primitive)) => match primitive {
                Primitive::Boolean => out.write_bool(false),
                Primitive::Byte => out.write_u8(0),
                Primitive::Char | Primitive::Short => out.write_i16(0),
                Primitive::Int => out.write_i32(0),
                Primitive::Long => out.write_i64(0),
                Primitive::Float => out.write_f32(0.0),
                Primitive::Double => out.write_f64(0.0),
            },
            Argument::Placeholder(array @ TypeDesc::Array(_)) => {
                out.write_empty_array(&array.class_name());
            }
            Argument::Placeholder(TypeDesc::Object(_)) => out.write_null(),
            Argument::Placeholder(TypeDesc::Void) => {}
            Argument::Value(value) => value.write(out),
        }
    }
}

impl From<JavaValue> for Argument {
    fn from(value: JavaValue) -> Self {
        Argument::Value(value)
    }
}

/// A call on one remote object. Built per call and consumed by encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub target: ObjId,
    pub selector: Selector,
    pub args: Vec<Argument>,
    pub returns: ReturnKind,
}

impl CallFrame {
    pub fn new(target: ObjId, selector: Selector, args: Vec<Argument>) -> Self {
        Self {
            target,
            selector,
            args,
            returns: ReturnKind::MaybeVoid,
        }
    }

    pub fn expecting(mut self, returns: ReturnKind) -> Self {
        self.returns = returns;
        self
    }

    /// Sets what to wait for from the declared return type.
    pub fn returning(self, return_type: &TypeDesc) -> Self {
        match return_type {
            TypeDesc::Void => self.expecting(ReturnKind::MaybeVoid),
            _ => self.expecting(ReturnKind::Value),
        }
    }

    /// A frame filling every parameter with a placeholder.
    pub fn placeholders(target: ObjId, selector: Selector, params: &[TypeDesc]) -> Self {
        let args = params.iter().cloned().map(Argument::Placeholder).collect();
        Self::new(target, selector, args)
    }

    pub fn mode(&self) -> DispatchMode {
        self.selector.mode()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = StreamWriter::new();
        self.target.write(&mut out);
        let (op, hash) = self.selector.wire();
        out.write_i32(op);
        out.write_i64(hash);
        for arg in &self.args {
            arg.write(&mut out);
        }
        let stream = out.finish();

        let mut message = Vec::with_capacity(stream.len() + 1);
        message.push(MessageType::Call as u8);
        message.extend_from_slice(&stream);
        message
    }
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (op, hash) = self.selector.wire();
        write!(
            f,
            "objnum {} op {} hash {} ({} args)",
            self.target.num,
            op,
            hash,
            self.args.len()
        )
    }
}

/// Sends `frame` on `session` and classifies the reply.
pub async fn invoke(session: &mut Session, frame: &CallFrame) -> Result<ResponseClass, SessionError> {
    let reply = session.call_expecting(&frame.encode(), frame.returns).await?;
    let class = ResponseClass::from_reply(&reply)?;
    debug!(endpoint = %session.endpoint(), call = %frame, response = %class, "invoke");
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::MethodCandidate;
    use crate::endpoint::Endpoint;
    use crate::mock::{MockDialer, MockException, MockReply};
    use crate::serial::Content;
    use crate::session::SessionOptions;

    #[test]
    fn header_block_layout() {
        let frame = CallFrame::new(
            ObjId::REGISTRY,
            Selector::Legacy {
                op: 2,
                interface_hash: 4905912898345647071,
            },
            vec![Argument::Value(JavaValue::String("x".into()))],
        );
        let bytes = frame.encode();
        assert_eq!(&bytes[..7], &[0x50, 0xAC, 0xED, 0x00, 0x05, 0x77, 34]);
        // objNum and the zero UID
        assert!(bytes[7..29].iter().all(|&b| b == 0));
        assert_eq!(&bytes[29..33], &2i32.to_be_bytes());
        assert_eq!(&bytes[33..41], &4905912898345647071i64.to_be_bytes());
        assert_eq!(&bytes[41..], &[0x74, 0x00, 0x01, b'x']);
    }

    #[test]
    fn primitive_placeholders_share_the_header_block() {
        let method = MethodCandidate::parse("void f(int a, long b, String c, int[] d)").unwrap();
        let frame = CallFrame::placeholders(ObjId::DGC, method.selector(), method.params());
        assert_eq!(frame.mode(), DispatchMode::Modern);
        let bytes = frame.encode();
        assert_eq!(bytes[6], 34 + 4 + 8);
        assert_eq!(&bytes[29..33], &(-1i32).to_be_bytes());
        assert_eq!(bytes[5 + 2 + 46], 0x70);
        assert_eq!(bytes[5 + 2 + 47], 0x75);
    }

    #[test]
    fn auto_mode_tries_method_hashes_first() {
        use DispatchMode::{Legacy, Modern};
        assert_eq!(
            LegacyMode::Auto.dispatch_order(Some("javax.management.remote.rmi.RMIServerImpl_Stub")),
            &[Modern, Legacy]
        );
        assert_eq!(LegacyMode::Auto.dispatch_order(Some("com.sun.proxy.$Proxy0")), &[Modern]);
        assert_eq!(LegacyMode::Auto.dispatch_order(None), &[Modern]);
        assert_eq!(LegacyMode::Force.dispatch_order(None), &[Legacy]);
        assert_eq!(LegacyMode::Never.dispatch_order(Some("Foo_Stub")), &[Modern]);
        assert_eq!("FORCE".parse::<LegacyMode>().unwrap(), LegacyMode::Force);
        assert!("sometimes".parse::<LegacyMode>().is_err());
    }

    #[tokio::test]
    async fn invoke_classifies_mock_replies() {
        let execute = MethodCandidate::parse("String execute(String cmd)").unwrap();
        let execute_hash = execute.hash();
        let dialer = MockDialer::new(move |call| {
            if call.hash == execute_hash {
                let arg = call.args.first().cloned();
                assert_eq!(arg, Some(Content::Null));
                MockReply::Exception(MockException::new("java.lang.NullPointerException", "cmd"))
            } else {
                MockReply::unknown_method()
            }
        });
        let mut session = Session::new(
            Endpoint::new("target", 9010),
            dialer,
            SessionOptions::default(),
        );

        let target = ObjId::random();
        let hit = CallFrame::placeholders(target, execute.selector(), execute.params());
        assert!(invoke(&mut session, &hit).await.unwrap().reached_method());

        let miss = MethodCandidate::parse("String exec(String cmd)").unwrap();
        let miss = CallFrame::placeholders(target, miss.selector(), miss.params());
        assert_eq!(
            invoke(&mut session, &miss).await.unwrap().rejection_kind(),
            Some(crate::response::RejectionKind::UnknownMethod)
        );
    }
}
