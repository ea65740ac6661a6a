//! Calls on the RMI registry, ObjID 0.

use std::fmt;
use std::str::FromStr;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::call::{invoke, Argument, CallFrame, DispatchMode, Selector};
use crate::candidate::method_hash;
use crate::endpoint::{Endpoint, ListenerSpec};
use crate::error::{RmgError, SessionError};
use crate::findings::{
    Admission, DeliveryOutcome, FilterStatus, LocalhostBypass, Probe, RegistryFindings,
    StringMarshalling, STRING_ONLY_MESSAGE,
};
use crate::protocol::ObjId;
use crate::reference::RemoteObjectRef;
use crate::response::{RejectionKind, ResponseClass};
use crate::serial::{JavaValue, RefTarget};
use crate::session::{ReturnKind, Session};

/// Interface hash of `sun.rmi.registry.RegistryImpl_Stub`.
pub const REGISTRY_INTERFACE_HASH: i64 = 4905912898345647071;

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryOp {
    Bind = 0,
    List = 1,
    Lookup = 2,
    Rebind = 3,
    Unbind = 4,
}

const ALL_OPS: [RegistryOp; 5] = [
    RegistryOp::Bind,
    RegistryOp::List,
    RegistryOp::Lookup,
    RegistryOp::Rebind,
    RegistryOp::Unbind,
];

impl RegistryOp {
    pub fn name(self) -> &'static str {
        match self {
            RegistryOp::Bind => "bind",
            RegistryOp::List => "list",
            RegistryOp::Lookup => "lookup",
            RegistryOp::Rebind => "rebind",
            RegistryOp::Unbind => "unbind",
        }
    }

    fn name_and_descriptor(self) -> &'static str {
        match self {
            RegistryOp::Bind => "bind(Ljava/lang/String;Ljava/rmi/Remote;)V",
            RegistryOp::List => "list()[Ljava/lang/String;",
            RegistryOp::Lookup => "lookup(Ljava/lang/String;)Ljava/rmi/Remote;",
            RegistryOp::Rebind => "rebind(Ljava/lang/String;Ljava/rmi/Remote;)V",
            RegistryOp::Unbind => "unbind(Ljava/lang/String;)V",
        }
    }

    pub fn method_hash(self) -> i64 {
        method_hash(self.name_and_descriptor())
    }

    pub fn selector(self, mode: DispatchMode) -> Selector {
        match mode {
            DispatchMode::Legacy => Selector::Legacy {
                op: self as i32,
                interface_hash: REGISTRY_INTERFACE_HASH,
            },
            DispatchMode::Modern => Selector::Method {
                hash: self.method_hash(),
            },
        }
    }

    /// Recognizes an operation from the `(op, hash)` pair of a call header.
    pub fn from_wire(op: i32, hash: i64) -> Option<Self> {
        if op >= 0 {
            return (hash == REGISTRY_INTERFACE_HASH)
                .then(|| RegistryOp::from_i32(op))
                .flatten();
        }
        ALL_OPS.iter().copied().find(|candidate| candidate.method_hash() == hash)
    }

    pub fn returns(self) -> ReturnKind {
        match self {
            RegistryOp::List | RegistryOp::Lookup => ReturnKind::Value,
            _ => ReturnKind::MaybeVoid,
        }
    }

    /// Whether the registry only allows this operation from its own host.
    pub fn is_restricted(self) -> bool {
        matches!(self, RegistryOp::Bind | RegistryOp::Rebind | RegistryOp::Unbind)
    }
}

impl fmt::Display for RegistryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegistryOp {
    type Err = RmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_OPS
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| RmgError::invalid_input(format!("'{}' is not a registry method", s)))
    }
}

fn random_name() -> String {
    format!("rmg-{:08x}", rand::thread_rng().gen::<u32>())
}

/// Client for one registry endpoint.
///
/// `list` and `lookup` share one connection. Every other call runs on a
/// fresh connection, because a rejected argument can leave the server's end of
/// the stream unusable.
pub struct RegistryClient {
    session: Session,
}

impl RegistryClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.session.endpoint()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    async fn call_fresh(
        &self,
        op: RegistryOp,
        args: Vec<Argument>,
        spoofed: bool,
    ) -> Result<ResponseClass, SessionError> {
        // the loopback origin only matters for the hash dispatched skeleton path
        let (mut session, mode) = if spoofed {
            let options = self.session.options().clone().spoofed();
            (self.session.fork_with(options), DispatchMode::Modern)
        } else {
            (self.session.fork(), DispatchMode::Legacy)
        };
        let frame = CallFrame::new(ObjId::REGISTRY, op.selector(mode), args).expecting(op.returns());
        let result = invoke(&mut session, &frame).await;
        session.close().await;
        result
    }

    pub async fn list(&mut self) -> Result<Vec<String>, RmgError> {
        let frame = CallFrame::new(
            ObjId::REGISTRY,
            RegistryOp::List.selector(DispatchMode::Legacy),
            Vec::new(),
        )
        .expecting(ReturnKind::Value);
        match invoke(&mut self.session, &frame).await? {
            ResponseClass::Success(frame) => frame
                .string_array()
                .ok_or_else(|| RmgError::Protocol("list did not return a String[]".to_owned())),
            other => Err(RmgError::RegistryUnavailable {
                endpoint: self.endpoint().clone(),
                reason: other.to_string(),
            }),
        }
    }

    pub async fn lookup(&mut self, name: &str) -> Result<ResponseClass, SessionError> {
        let frame = CallFrame::new(
            ObjId::REGISTRY,
            RegistryOp::Lookup.selector(DispatchMode::Legacy),
            vec![Argument::Value(JavaValue::String(name.to_owned()))],
        )
        .expecting(ReturnKind::Value);
        invoke(&mut self.session, &frame).await
    }

    /// Looks `name` up and decodes the reference it is bound to.
    pub async fn lookup_ref(&mut self, name: &str) -> Result<RemoteObjectRef, RmgError> {
        match self.lookup(name).await? {
            ResponseClass::Success(frame) => {
                Ok(RemoteObjectRef::decode(&frame, self.session.endpoint())?)
            }
            other => Err(RmgError::Protocol(format!("lookup of '{}': {}", name, other))),
        }
    }

    /// Binds `name` to a reference pointing at `listener`.
    pub async fn bind(
        &self,
        name: &str,
        listener: &ListenerSpec,
        spoofed: bool,
    ) -> Result<ResponseClass, SessionError> {
        let target = JavaValue::RemoteRef(RefTarget::listener(listener.host.clone(), listener.port));
        info!(endpoint = %self.endpoint(), name, %listener, spoofed, "bind");
        self.call_fresh(
            RegistryOp::Bind,
            vec![JavaValue::String(name.to_owned()).into(), target.into()],
            spoofed,
        )
        .await
    }

    pub async fn rebind(
        &self,
        name: &str,
        listener: &ListenerSpec,
        spoofed: bool,
    ) -> Result<ResponseClass, SessionError> {
        let target = JavaValue::RemoteRef(RefTarget::listener(listener.host.clone(), listener.port));
        info!(endpoint = %self.endpoint(), name, %listener, spoofed, "rebind");
        self.call_fresh(
            RegistryOp::Rebind,
            vec![JavaValue::String(name.to_owned()).into(), target.into()],
            spoofed,
        )
        .await
    }

    pub async fn unbind(&self, name: &str, spoofed: bool) -> Result<ResponseClass, SessionError> {
        info!(endpoint = %self.endpoint(), name, spoofed, "unbind");
        self.call_fresh(
            RegistryOp::Unbind,
            vec![JavaValue::String(name.to_owned()).into()],
            spoofed,
        )
        .await
    }

    /// Sends `value` where `op` reads an object. For bind and rebind that is
    /// the bound object, for lookup and unbind the name.
    pub async fn deliver(
        &self,
        op: RegistryOp,
        value: JavaValue,
        spoofed: bool,
    ) -> Result<ResponseClass, RmgError> {
        let args = match op {
            RegistryOp::Bind | RegistryOp::Rebind => {
                vec![JavaValue::String(random_name()).into(), value.into()]
            }
            RegistryOp::Lookup | RegistryOp::Unbind => vec![value.into()],
            RegistryOp::List => {
                return Err(RmgError::invalid_input("list takes no arguments"));
            }
        };
        debug!(endpoint = %self.endpoint(), %op, "delivering argument");
        Ok(self.call_fresh(op, args, spoofed).await?)
    }

    pub async fn probe_string_marshalling(&self) -> Probe<StringMarshalling> {
        let response = match self
            .deliver(RegistryOp::Lookup, JavaValue::Integer(0), false)
            .await
        {
            Ok(response) => response,
            Err(err) => return Probe::Failed(err.to_string()),
        };
        match &response {
            ResponseClass::ProtocolRejection(rejection) => match rejection.kind {
                RejectionKind::TypeMismatch if rejection.exception.mentions(STRING_ONLY_MESSAGE) => {
                    Probe::Done(StringMarshalling::ReadString)
                }
                RejectionKind::TypeMismatch => Probe::Done(StringMarshalling::ReadObject),
                RejectionKind::Unmarshal if rejection.exception.mentions("invalid type code") => {
                    Probe::Done(StringMarshalling::ReadString)
                }
                _ => Probe::Inconclusive(response.to_string()),
            },
            _ => Probe::Inconclusive(response.to_string()),
        }
    }

    pub async fn probe_codebase(&self, op: RegistryOp, codebase_url: &str) -> Probe<DeliveryOutcome> {
        let value = JavaValue::CodebaseClass {
            class_name: format!("rmg.Probe{:08x}", rand::thread_rng().gen::<u32>()),
            codebase: Some(codebase_url.to_owned()),
        };
        match self.deliver(op, value, false).await {
            Ok(response) => Probe::Done(DeliveryOutcome::from_response(&response)),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    /// Unbinds a random name once normally and once announcing a loopback
    /// origin through the method hash dispatch path.
    pub async fn probe_localhost_bypass(&self) -> Probe<LocalhostBypass> {
        let name = random_name();
        let plain = match self.unbind(&name, false).await {
            Ok(response) => Admission::from_response(&response),
            Err(err) => return Probe::Failed(err.to_string()),
        };
        let spoofed = match self.unbind(&name, true).await {
            Ok(response) => Admission::from_response(&response),
            Err(err) => return Probe::Failed(err.to_string()),
        };
        Probe::Done(LocalhostBypass { plain, spoofed })
    }

    pub async fn probe_filter(&self, op: RegistryOp) -> Probe<FilterStatus> {
        match self.deliver(op, JavaValue::EmptyHashMap, false).await {
            Ok(response) => FilterStatus::from_response(&response),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    /// Sends a remote reference to an unreachable listener. A filtered
    /// registry that still admits references can be made to open an outbound
    /// JRMP connection.
    pub async fn probe_ref_admission(&self, op: RegistryOp) -> Probe<DeliveryOutcome> {
        let value = JavaValue::RemoteRef(RefTarget::listener("127.0.0.1", 1));
        match self.deliver(op, value, false).await {
            Ok(response) => Probe::Done(DeliveryOutcome::from_response(&response)),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    pub async fn enumerate(&self, op: RegistryOp, codebase_url: &str) -> RegistryFindings {
        let string_marshalling = self.probe_string_marshalling().await;
        info!(endpoint = %self.endpoint(), result = %string_marshalling, "string marshalling");
        let codebase = self.probe_codebase(op, codebase_url).await;
        info!(endpoint = %self.endpoint(), result = %codebase, "codebase");
        let localhost_bypass = self.probe_localhost_bypass().await;
        info!(endpoint = %self.endpoint(), result = %localhost_bypass, "localhost bypass");
        let filter = self.probe_filter(op).await;
        info!(endpoint = %self.endpoint(), result = %filter, "deserialization filter");
        let ref_admission = self.probe_ref_admission(op).await;
        info!(endpoint = %self.endpoint(), result = %ref_admission, "remote reference admission");
        RegistryFindings {
            string_marshalling,
            codebase,
            localhost_bypass,
            filter,
            ref_admission,
        }
    }
}
