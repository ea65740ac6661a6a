//! An in-process JRMP peer for tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BufMut;
use parking_lot::Mutex;

use crate::connection::{Connection, Dialer};
use crate::endpoint::Endpoint;
use crate::protocol::{MessageType, ObjId, ReturnType, Uid, MAGIC};
use crate::serial::{
    BlockCursor, ClassSpec, Content, FieldSpec, Handles, JavaValue, RefTarget, StreamReader,
    StreamWriter, SC_SERIALIZABLE, SC_WRITE_METHOD,
};
use crate::util::{decode_modified_utf8, put_utf};

/// The address the mock server reports back as the client's.
pub const CLIENT_ADDRESS: &str = "10.13.37.1";

const REMOTE_STUB_SUID: i64 = -1_585_587_260_594_494_182;
const REMOTE_OBJECT_SUID: i64 = -3_215_090_123_894_869_218;

/// A call as the mock server saw it.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub endpoint: Endpoint,
    /// Host the client announced during the handshake.
    pub origin: String,
    pub obj_id: ObjId,
    pub op: i32,
    pub hash: i64,
    /// Leftover header block bytes (primitive arguments) and argument objects.
    pub args: Vec<Content>,
    pub handles: Handles,
}

impl MockCall {
    pub fn string_arg(&self, index: usize) -> Option<&str> {
        self.args
            .iter()
            .filter(|arg| !matches!(arg, Content::BlockData(_)))
            .nth(index)
            .and_then(|arg| self.handles.resolve_string(arg))
    }

    pub fn object_class(&self, index: usize) -> Option<&str> {
        self.args
            .iter()
            .filter(|arg| !matches!(arg, Content::BlockData(_)))
            .nth(index)
            .and_then(|arg| match self.handles.resolve(arg) {
                Content::Object(object) => Some(object.class_name()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone)]
pub struct MockException {
    pub class_name: String,
    pub message: Option<String>,
    pub cause: Option<Box<MockException>>,
}

impl MockException {
    pub fn new(class_name: &str, message: &str) -> Self {
        Self {
            class_name: class_name.to_owned(),
            message: Some(message.to_owned()),
            cause: None,
        }
    }

    pub fn caused_by(mut self, cause: MockException) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wraps `inner` the way the server's dispatcher wraps RemoteExceptions.
    pub fn server(inner: MockException) -> Self {
        Self::new(
            "java.rmi.ServerException",
            "RemoteException occurred in server thread",
        )
        .caused_by(inner)
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    Void,
    Value(JavaValue),
    StringArray(Vec<String>),
    /// A legacy stub of class `class_name` referring to `target`.
    Stub {
        class_name: String,
        target: RefTarget,
    },
    Exception(MockException),
    /// Never answer.
    Silence,
    /// Close the connection without answering.
    Close,
}

impl MockReply {
    pub fn string_array(names: &[&str]) -> Self {
        MockReply::StringArray(names.iter().map(|name| (*name).to_owned()).collect())
    }

    pub fn exception(class_name: &str, message: &str) -> Self {
        MockReply::Exception(MockException::new(class_name, message))
    }

    pub fn unknown_method() -> Self {
        MockReply::Exception(MockException::server(MockException::new(
            "java.rmi.UnmarshalException",
            "unrecognized method hash: method not supported by remote object",
        )))
    }

    pub fn no_such_object() -> Self {
        MockReply::exception("java.rmi.NoSuchObjectException", "no such object in table")
    }
}

pub fn encode_reply(reply: &MockReply) -> Vec<u8> {
    let return_type = match reply {
        MockReply::Silence | MockReply::Close => return Vec::new(),
        MockReply::Exception(_) => ReturnType::Exceptional,
        _ => ReturnType::Normal,
    };
    let mut out = StreamWriter::new();
    out.write_u8(return_type as u8);
    Uid {
        unique: 0x1c2d3e4f,
        time: 1_700_000_000_000,
        count: -32768,
    }
    .write(&mut out);

    match reply {
        MockReply::Value(value) => value.write(&mut out),
        MockReply::StringArray(names) => {
            out.begin_array("[Ljava.lang.String;", names.len());
            for name in names {
                out.write_string(name);
            }
        }
        MockReply::Stub { class_name, target } => write_stub(&mut out, class_name, target),
        MockReply::Exception(exception) => write_exception(&mut out, exception),
        MockReply::Void | MockReply::Silence | MockReply::Close => {}
    }

    let stream = out.finish();
    let mut message = vec![MessageType::ReturnData as u8];
    message.extend_from_slice(&stream);
    message
}

fn write_stub(out: &mut StreamWriter, class_name: &str, target: &RefTarget) {
    out.begin_object(&[
        ClassSpec {
            name: class_name,
            suid: 2,
            flags: SC_SERIALIZABLE,
            fields: &[],
            annotation: None,
        },
        ClassSpec {
            name: "java.rmi.server.RemoteStub",
            suid: REMOTE_STUB_SUID,
            flags: SC_SERIALIZABLE,
            fields: &[],
            annotation: None,
        },
        ClassSpec {
            name: "java.rmi.server.RemoteObject",
            suid: REMOTE_OBJECT_SUID,
            flags: SC_SERIALIZABLE | SC_WRITE_METHOD,
            fields: &[],
            annotation: None,
        },
    ]);
    out.write_utf("UnicastRef");
    out.write_utf(&target.host);
    out.write_i32(i32::from(target.port));
    target.obj_id.write(out);
    out.write_bool(false);
    out.end_block();
}

fn write_exception(out: &mut StreamWriter, exception: &MockException) {
    let remote = exception.class_name.starts_with("java.rmi.");
    let throwable_fields = [
        FieldSpec::object("cause", "Ljava/lang/Throwable;"),
        FieldSpec::object("detailMessage", "Ljava/lang/String;"),
    ];
    let detail_fields = [FieldSpec::object("detail", "Ljava/lang/Throwable;")];

    let mut classes = Vec::new();
    if remote {
        if exception.class_name != "java.rmi.RemoteException" {
            classes.push(plain(exception.class_name.as_str()));
        }
        classes.push(ClassSpec {
            fields: &detail_fields,
            ..plain("java.rmi.RemoteException")
        });
        classes.push(plain("java.io.IOException"));
    } else {
        classes.push(plain(exception.class_name.as_str()));
    }
    classes.push(plain("java.lang.Exception"));
    classes.push(ClassSpec {
        flags: SC_SERIALIZABLE | SC_WRITE_METHOD,
        fields: &throwable_fields,
        ..plain("java.lang.Throwable")
    });

    let handle = out.begin_object(&classes);
    match (&exception.cause, remote) {
        (Some(cause), false) => write_exception(out, cause),
        _ => out.write_reference(handle),
    }
    match &exception.message {
        Some(message) => {
            out.write_string(message);
        }
        None => out.write_null(),
    }
    out.end_block();
    if remote {
        match &exception.cause {
            Some(cause) => write_exception(out, cause),
            None => out.write_null(),
        }
    }
}

fn plain(name: &str) -> ClassSpec<'_> {
    ClassSpec {
        name,
        suid: 1,
        flags: SC_SERIALIZABLE,
        fields: &[],
        annotation: None,
    }
}

fn decode_call(endpoint: &Endpoint, origin: &str, message: &[u8]) -> Option<MockCall> {
    let (&first, stream) = message.split_first()?;
    if first != MessageType::Call as u8 {
        return None;
    }
    let mut reader = StreamReader::new(stream);
    reader.read_header().ok()?;
    let header = reader.read_content().ok()?;
    let header = std::slice::from_ref(&header);
    let mut cursor = BlockCursor::new(header);
    let obj_id = ObjId::read(&mut cursor).ok()?;
    let op = cursor.read_i32().ok()?;
    let hash = cursor.read_i64().ok()?;

    let mut args = Vec::new();
    let rest = cursor.remaining_in_block();
    if !rest.is_empty() {
        args.push(Content::BlockData(rest.to_vec()));
    }
    while !reader.is_at_end() {
        match reader.read_content() {
            Ok(content) => args.push(content),
            Err(_) => break,
        }
    }
    let (handles, _) = reader.into_parts();
    Some(MockCall {
        endpoint: endpoint.clone(),
        origin: origin.to_owned(),
        obj_id,
        op,
        hash,
        args,
        handles,
    })
}

type Handler = dyn Fn(&MockCall) -> MockReply + Send + Sync;

struct Inner {
    handler: Box<Handler>,
    calls: Mutex<Vec<MockCall>>,
    dials: AtomicUsize,
    refuse: bool,
}

pub struct MockDialer {
    inner: Arc<Inner>,
}

impl MockDialer {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&MockCall) -> MockReply + Send + Sync + 'static,
    {
        Self::build(Box::new(handler), false)
    }

    /// A dialer whose every connection attempt is refused.
    pub fn refusing() -> Arc<Self> {
        Self::build(Box::new(|_| MockReply::Close), true)
    }

    fn build(handler: Box<Handler>, refuse: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                handler,
                calls: Mutex::new(Vec::new()),
                dials: AtomicUsize::new(0),
                refuse,
            }),
        })
    }

    pub fn dials(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.calls.lock().clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
        self.inner.dials.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        Ok(Box::new(MockConnection {
            inner: Arc::clone(&self.inner),
            endpoint: endpoint.clone(),
            state: State::Hello,
            origin: String::new(),
            outbox: Vec::new(),
            closed: false,
        }))
    }
}

enum State {
    Hello,
    Endpoint,
    Calls,
}

struct MockConnection {
    inner: Arc<Inner>,
    endpoint: Endpoint,
    state: State,
    origin: String,
    outbox: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        match self.state {
            State::Hello => {
                if !data.starts_with(MAGIC) {
                    self.closed = true;
                    return Ok(());
                }
                self.outbox.put_u8(0x4E);
                put_utf(&mut self.outbox, CLIENT_ADDRESS);
                self.outbox.put_i32(50123);
                self.state = State::Endpoint;
            }
            State::Endpoint => {
                let len = data
                    .get(..2)
                    .map(|len| usize::from(u16::from_be_bytes([len[0], len[1]])))
                    .unwrap_or(0);
                self.origin = decode_modified_utf8(data.get(2..2 + len).unwrap_or(&[]));
                self.state = State::Calls;
            }
            State::Calls => {
                if data.first() == Some(&(MessageType::Ping as u8)) {
                    self.outbox.put_u8(MessageType::PingAck as u8);
                    return Ok(());
                }
                let call = match decode_call(&self.endpoint, &self.origin, data) {
                    Some(call) => call,
                    None => {
                        self.closed = true;
                        return Ok(());
                    }
                };
                let reply = (self.inner.handler)(&call);
                self.inner.calls.lock().push(call);
                match reply {
                    MockReply::Silence => {}
                    MockReply::Close => self.closed = true,
                    reply => self.outbox.extend_from_slice(&encode_reply(&reply)),
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        if !self.outbox.is_empty() {
            let n = self.outbox.len();
            buf.append(&mut self.outbox);
            return Ok(n);
        }
        if self.closed {
            return Ok(0);
        }
        std::future::pending().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Hands out one prepared connection.
pub struct OneShotDialer {
    conn: Mutex<Option<Box<dyn Connection>>>,
}

impl OneShotDialer {
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }
}

#[async_trait]
impl Dialer for OneShotDialer {
    async fn dial(&self, _endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
        self.conn
            .lock()
            .take()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }
}
