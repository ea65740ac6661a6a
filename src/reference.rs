use std::convert::TryFrom;

use tracing::trace;

use crate::endpoint::Endpoint;
use crate::protocol::ObjId;
use crate::response::ReturnFrame;
use crate::serial::{BlockCursor, CodecError, Content, Handles, Object};

const SSL_CLIENT_FACTORY: &str = "javax.rmi.ssl.SslRMIClientSocketFactory";
const FORMAT_HOST_PORT_FACTORY: u8 = 1;

/// A remote object as a registry hands it out: where it lives and what it
/// claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObjectRef {
    pub obj_id: ObjId,
    /// Where calls go, after applying the redirect policy.
    pub endpoint: Endpoint,
    /// Host as advertised in the reference.
    pub advertised_host: String,
    /// Interfaces of a dynamic proxy; empty for stubs.
    pub interfaces: Vec<String>,
    /// Stub class name, when the reference is not a proxy.
    pub stub_class: Option<String>,
    /// `UnicastRef` or `UnicastRef2`.
    pub ref_type: String,
}

impl RemoteObjectRef {
    /// Decodes the value of a `lookup` reply. `via` is the registry endpoint,
    /// which decides how the advertised endpoint is reached.
    pub fn decode(frame: &ReturnFrame, via: &Endpoint) -> Result<Self, CodecError> {
        let object = match frame.value() {
            Some(Content::Object(object)) => object,
            _ => return Err(CodecError::InvalidData("lookup did not return an object")),
        };
        let handles = frame.handles();

        let (interfaces, stub_class, data_holder) = if object.desc.is_proxy() {
            let interfaces = object.desc.proxy_interfaces.clone().unwrap_or_default();
            let handler = object
                .field("h")
                .and_then(|value| value.as_content())
                .map(|content| handles.resolve(content));
            match handler {
                Some(Content::Object(handler)) => (interfaces, None, handler),
                _ => return Err(CodecError::InvalidData("proxy without invocation handler")),
            }
        } else {
            (Vec::new(), Some(object.class_name().to_owned()), object)
        };

        let mut reference = Self::read_ref_data(data_holder, handles)?;
        reference.endpoint = via.redirect(
            &reference.advertised_host,
            reference.endpoint.port,
            reference.endpoint.tls,
        );
        reference.interfaces = interfaces;
        reference.stub_class = stub_class;
        trace!(reference = ?reference, "decoded remote reference");
        Ok(reference)
    }

    fn read_ref_data(holder: &Object, handles: &Handles) -> Result<Self, CodecError> {
        let data = holder
            .class_data("java.rmi.server.RemoteObject")
            .ok_or(CodecError::InvalidData("not a RemoteObject"))?;
        let mut cursor = BlockCursor::new(&data.annotations);
        let ref_type = cursor.read_utf()?;
        let (host, port, tls) = match ref_type.as_str() {
            "UnicastRef" => {
                let host = cursor.read_utf()?;
                (host, cursor.read_i32()?, false)
            }
            "UnicastRef2" => {
                let format = cursor.read_u8()?;
                let host = cursor.read_utf()?;
                let port = cursor.read_i32()?;
                let mut tls = false;
                if format == FORMAT_HOST_PORT_FACTORY {
                    let factory = handles.resolve(cursor.next_object()?);
                    if let Content::Object(factory) = factory {
                        tls = factory.class_name() == SSL_CLIENT_FACTORY;
                    }
                }
                (host, port, tls)
            }
            _ => return Err(CodecError::InvalidData("unsupported remote reference type")),
        };
        let obj_id = ObjId::read(&mut cursor)?;
        let port = u16::try_from(port).map_err(|_| CodecError::InvalidData("port out of range"))?;

        let mut endpoint = Endpoint::new(host.clone(), port);
        endpoint.tls = tls;
        Ok(Self {
            obj_id,
            endpoint,
            advertised_host: host,
            interfaces: Vec::new(),
            stub_class: None,
            ref_type,
        })
    }

    /// The most specific class name the reference advertises.
    pub fn class_name(&self) -> Option<&str> {
        if let Some(stub) = &self.stub_class {
            return Some(stub);
        }
        self.interfaces
            .iter()
            .map(String::as_str)
            .find(|name| *name != "java.rmi.Remote")
    }

    pub fn is_stub(&self) -> bool {
        self.stub_class.is_some()
    }
}
