//! Return messages and what they mean.
//!
//! The dispatch layer of an RMI server only throws a small family of
//! exceptions before a method body runs. Anything else came from the method
//! itself, which proves the method exists.

use std::fmt;

use num_traits::FromPrimitive;

use crate::protocol::{MessageType, ReturnType, Uid};
use crate::serial::{BlockCursor, CodecError, Content, Handles, Object, StreamReader};

const RETURN_HEADER_LEN: usize = 15;
const MAX_CAUSE_DEPTH: usize = 16;

/// How much of a buffered reply forms one return message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Complete(usize),
    /// A normal return with nothing after its header so far. Either a void
    /// method returned, or the value has not arrived yet.
    MaybeVoid(usize),
}

pub fn frame_length(buf: &[u8]) -> Result<Framing, CodecError> {
    let (&first, stream) = buf.split_first().ok_or(CodecError::Incomplete)?;
    if MessageType::from_u8(first) != Some(MessageType::ReturnData) {
        return Err(CodecError::InvalidData("expected a ReturnData message"));
    }
    let mut reader = StreamReader::new(stream);
    reader.read_header()?;
    let block = match reader.read_content()? {
        Content::BlockData(block) => block,
        _ => return Err(CodecError::InvalidData("return header missing")),
    };
    if block.len() < RETURN_HEADER_LEN {
        return Err(CodecError::InvalidData("return header too short"));
    }
    if block.len() > RETURN_HEADER_LEN {
        // primitive return value, carried in the same block
        return Ok(Framing::Complete(1 + reader.position()));
    }
    if reader.is_at_end() {
        return match ReturnType::from_u8(block[0]) {
            Some(ReturnType::Normal) => Ok(Framing::MaybeVoid(1 + reader.position())),
            Some(ReturnType::Exceptional) => Err(CodecError::Incomplete),
            None => Err(CodecError::InvalidData("unknown return type")),
        };
    }
    reader.read_content()?;
    Ok(Framing::Complete(1 + reader.position()))
}

/// A decoded ReturnData message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnFrame {
    pub return_type: ReturnType,
    pub uid: Uid,
    /// Raw bytes of a primitive return value, if any.
    pub primitive: Vec<u8>,
    value: Option<Content>,
    handles: Handles,
    codebases: Vec<String>,
}

impl ReturnFrame {
    pub fn decode(message: &[u8]) -> Result<Self, CodecError> {
        let (&first, stream) = message.split_first().ok_or(CodecError::Incomplete)?;
        if MessageType::from_u8(first) != Some(MessageType::ReturnData) {
            return Err(CodecError::InvalidData("expected a ReturnData message"));
        }
        let mut reader = StreamReader::new(stream);
        reader.read_header()?;
        let header = reader.read_content()?;
        let header = std::slice::from_ref(&header);
        let mut cursor = BlockCursor::new(header);
        let return_type = ReturnType::from_u8(cursor.read_u8()?)
            .ok_or(CodecError::InvalidData("unknown return type"))?;
        let uid = Uid::read(&mut cursor)?;
        let primitive = cursor.remaining_in_block().to_vec();
        let value = if reader.is_at_end() {
            None
        } else {
            Some(reader.read_content()?)
        };
        let (handles, codebases) = reader.into_parts();
        Ok(Self {
            return_type,
            uid,
            primitive,
            value,
            handles,
            codebases,
        })
    }

    /// The returned or thrown object, references resolved.
    pub fn value(&self) -> Option<&Content> {
        self.value.as_ref().map(|value| self.handles.resolve(value))
    }

    pub fn handles(&self) -> &Handles {
        &self.handles
    }

    /// Class annotations seen in the reply. Servers annotate with their
    /// codebase when `java.rmi.server.codebase` is set.
    pub fn codebases(&self) -> &[String] {
        &self.codebases
    }

    pub fn string_array(&self) -> Option<Vec<String>> {
        match self.value()? {
            Content::Array(array) => array
                .elements
                .iter()
                .map(|element| {
                    element
                        .as_content()
                        .and_then(|content| self.handles.resolve_string(content))
                        .map(str::to_owned)
                })
                .collect(),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<ExceptionInfo> {
        if self.return_type != ReturnType::Exceptional {
            return None;
        }
        match self.value()? {
            Content::Object(object) => Some(ExceptionInfo::from_object(object, &self.handles, 0)),
            _ => None,
        }
    }
}

/// A thrown exception reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub class_name: String,
    pub message: Option<String>,
    pub cause: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    pub fn new(class_name: impl Into<String>, message: Option<&str>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.map(str::to_owned),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ExceptionInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    fn from_object(object: &Object, handles: &Handles, depth: usize) -> Self {
        let message = object
            .class_data("java.lang.Throwable")
            .and_then(|data| data.field("detailMessage"))
            .and_then(|value| value.as_content())
            .and_then(|content| handles.resolve_string(content))
            .map(str::to_owned);

        // RemoteException keeps its cause in `detail`; Throwable.cause points
        // at the exception itself when unset.
        let detail = object.field("detail").and_then(|value| value.as_content());
        let throwable_cause = object
            .class_data("java.lang.Throwable")
            .and_then(|data| data.field("cause"))
            .and_then(|value| value.as_content());
        let cause = detail
            .into_iter()
            .chain(throwable_cause)
            .map(|content| handles.resolve(content))
            .find_map(|content| match content {
                Content::Object(cause) if cause.handle != object.handle => Some(cause),
                _ => None,
            })
            .filter(|_| depth < MAX_CAUSE_DEPTH)
            .map(|cause| Box::new(Self::from_object(cause, handles, depth + 1)));

        Self {
            class_name: object.class_name().to_owned(),
            message,
            cause,
        }
    }

    /// This exception followed by its causes.
    pub fn chain(&self) -> impl Iterator<Item = &ExceptionInfo> {
        std::iter::successors(Some(self), |info| info.cause.as_deref())
    }

    pub fn find(&self, class_name: &str) -> Option<&ExceptionInfo> {
        self.chain().find(|info| info.class_name == class_name)
    }

    /// Whether any message in the chain contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.chain()
            .filter_map(|info| info.message.as_deref())
            .any(|message| message.contains(needle))
    }

    pub fn simple_name(&self) -> &str {
        self.class_name
            .rsplit('.')
            .next()
            .unwrap_or(self.class_name.as_str())
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Why the dispatch layer refused a call before reaching a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// The object id is not exported.
    NoSuchObject,
    /// No method matches the selector.
    UnknownMethod,
    AccessDenied,
    /// An argument's class could not be loaded.
    ClassNotFound,
    /// A deserialization filter rejected an argument.
    FilterRejected,
    /// An argument had the wrong type for the parameter it was read into.
    TypeMismatch,
    /// Any other failure while reading the arguments.
    Unmarshal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub exception: ExceptionInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseClass {
    Success(ReturnFrame),
    ProtocolRejection(Rejection),
    RemoteFault(ExceptionInfo),
}

impl ResponseClass {
    pub fn from_reply(message: &[u8]) -> Result<Self, CodecError> {
        Ok(classify(ReturnFrame::decode(message)?))
    }

    /// True when the call got past dispatch into a method body.
    pub fn reached_method(&self) -> bool {
        matches!(
            self,
            ResponseClass::Success(_) | ResponseClass::RemoteFault(_)
        )
    }

    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            ResponseClass::ProtocolRejection(rejection) => Some(rejection.kind),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        match self {
            ResponseClass::Success(_) => None,
            ResponseClass::ProtocolRejection(rejection) => Some(&rejection.exception),
            ResponseClass::RemoteFault(exception) => Some(exception),
        }
    }
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseClass::Success(_) => write!(f, "success"),
            ResponseClass::ProtocolRejection(rejection) => {
                write!(f, "rejected ({:?}): {}", rejection.kind, rejection.exception)
            }
            ResponseClass::RemoteFault(exception) => write!(f, "remote fault: {}", exception),
        }
    }
}

const SERVER_WRAPPERS: &[&str] = &[
    "java.rmi.ServerException",
    "java.rmi.ServerError",
    "java.rmi.ServerRuntimeException",
];

const UNKNOWN_METHOD_MESSAGES: &[&str] = &[
    "unrecognized method hash",
    "invalid method number",
    "skeleton class not found",
    "interface hash mismatch",
];

/// Sorts a decoded reply into success, dispatch rejection or method fault.
pub fn classify(frame: ReturnFrame) -> ResponseClass {
    if frame.return_type == ReturnType::Normal {
        return ResponseClass::Success(frame);
    }
    let exception = match frame.exception() {
        Some(exception) => exception,
        None => {
            let thrown = frame.value().map(Content::kind).unwrap_or("nothing");
            return ResponseClass::ProtocolRejection(Rejection {
                kind: RejectionKind::Unmarshal,
                exception: ExceptionInfo::new(
                    "java.io.StreamCorruptedException",
                    Some(&format!("exceptional return carrying {}", thrown)),
                ),
            });
        }
    };
    match rejection_kind(&exception) {
        Some(kind) => ResponseClass::ProtocolRejection(Rejection { kind, exception }),
        None => ResponseClass::RemoteFault(exception),
    }
}

fn rejection_kind(exception: &ExceptionInfo) -> Option<RejectionKind> {
    let root = exception
        .chain()
        .find(|info| !SERVER_WRAPPERS.contains(&info.class_name.as_str()))?;
    let message = root.message.as_deref().unwrap_or("");
    match root.class_name.as_str() {
        "java.rmi.NoSuchObjectException" => Some(RejectionKind::NoSuchObject),
        "java.rmi.server.SkeletonMismatchException"
        | "java.rmi.server.SkeletonNotFoundException" => Some(RejectionKind::UnknownMethod),
        "java.rmi.AccessException" => Some(RejectionKind::AccessDenied),
        "java.lang.ClassNotFoundException" => Some(RejectionKind::ClassNotFound),
        "java.io.InvalidClassException" if message.contains("REJECTED") => {
            Some(RejectionKind::FilterRejected)
        }
        "java.io.InvalidClassException" | "java.io.StreamCorruptedException" => {
            Some(RejectionKind::Unmarshal)
        }
        "java.rmi.UnmarshalException" => Some(unmarshal_kind(root, message)),
        _ => None,
    }
}

fn unmarshal_kind(root: &ExceptionInfo, message: &str) -> RejectionKind {
    if UNKNOWN_METHOD_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
    {
        return RejectionKind::UnknownMethod;
    }
    let rejected_by_filter = root.chain().any(|info| {
        info.class_name == "java.io.InvalidClassException"
            && info.message.as_deref().unwrap_or("").contains("REJECTED")
    });
    if rejected_by_filter {
        RejectionKind::FilterRejected
    } else if root.find("java.lang.ClassNotFoundException").is_some() {
        RejectionKind::ClassNotFound
    } else if root.find("java.lang.ClassCastException").is_some() {
        RejectionKind::TypeMismatch
    } else {
        RejectionKind::Unmarshal
    }
}
