//! Calls on the distributed garbage collector, ObjID 2.
//!
//! `clean` and `dirty` read an `ObjID[]` as their first argument before any
//! filter decision is made on the call, which makes them a delivery channel
//! for arbitrary objects.

use std::fmt;
use std::str::FromStr;

use num_derive::{FromPrimitive, ToPrimitive};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::call::{invoke, Argument, CallFrame, Selector};
use crate::candidate::{Primitive, TypeDesc};
use crate::endpoint::Endpoint;
use crate::error::{RmgError, SessionError};
use crate::findings::{DeliveryOutcome, DgcFindings, FilterStatus, Probe};
use crate::protocol::ObjId;
use crate::response::ResponseClass;
use crate::serial::JavaValue;
use crate::session::{ReturnKind, Session};

/// Interface hash of `sun.rmi.transport.DGCImpl_Stub`.
pub const DGC_INTERFACE_HASH: i64 = -669196253586618813;

#[derive(FromPrimitive, ToPrimitive, PartialEq, Eq, Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DgcOp {
    Clean = 0,
    Dirty = 1,
}

impl DgcOp {
    pub fn name(self) -> &'static str {
        match self {
            DgcOp::Clean => "clean",
            DgcOp::Dirty => "dirty",
        }
    }

    pub fn selector(self) -> Selector {
        Selector::Legacy {
            op: self as i32,
            interface_hash: DGC_INTERFACE_HASH,
        }
    }

    /// `dirty` returns the granted lease.
    pub fn returns(self) -> ReturnKind {
        match self {
            DgcOp::Clean => ReturnKind::MaybeVoid,
            DgcOp::Dirty => ReturnKind::Value,
        }
    }

    /// Arguments with `value` in the `ObjID[]` slot.
    fn args(self, value: JavaValue) -> Vec<Argument> {
        let mut args = vec![
            Argument::Value(value),
            Argument::Placeholder(TypeDesc::Primitive(Primitive::Long)),
            Argument::Value(JavaValue::Null),
        ];
        if self == DgcOp::Clean {
            args.push(Argument::Placeholder(TypeDesc::Primitive(Primitive::Boolean)));
        }
        args
    }
}

impl fmt::Display for DgcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DgcOp {
    type Err = RmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(DgcOp::Clean),
            "dirty" => Ok(DgcOp::Dirty),
            _ => Err(RmgError::invalid_input(format!(
                "'{}' is not a DGC method (clean, dirty)",
                s
            ))),
        }
    }
}

pub struct DgcClient {
    session: Session,
}

impl DgcClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.session.endpoint()
    }

    /// Sends `value` as the first argument of `op` on a fresh connection.
    pub async fn deliver(&self, op: DgcOp, value: JavaValue) -> Result<ResponseClass, SessionError> {
        let mut session = self.session.fork();
        let frame = CallFrame::new(ObjId::DGC, op.selector(), op.args(value)).expecting(op.returns());
        debug!(endpoint = %self.endpoint(), %op, "delivering argument");
        let result = invoke(&mut session, &frame).await;
        session.close().await;
        result
    }

    pub async fn probe_codebase(&self, op: DgcOp, codebase_url: &str) -> Probe<DeliveryOutcome> {
        let value = JavaValue::CodebaseClass {
            class_name: format!("rmg.Probe{:08x}", rand::thread_rng().gen::<u32>()),
            codebase: Some(codebase_url.to_owned()),
        };
        match self.deliver(op, value).await {
            Ok(response) => Probe::Done(DeliveryOutcome::from_response(&response)),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    pub async fn probe_filter(&self, op: DgcOp) -> Probe<FilterStatus> {
        match self.deliver(op, JavaValue::EmptyHashMap).await {
            Ok(response) => FilterStatus::from_response(&response),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    pub async fn enumerate(&self, op: DgcOp, codebase_url: &str) -> DgcFindings {
        let codebase = self.probe_codebase(op, codebase_url).await;
        info!(endpoint = %self.endpoint(), result = %codebase, "DGC codebase");
        let filter = self.probe_filter(op).await;
        info!(endpoint = %self.endpoint(), result = %filter, "DGC deserialization filter");
        DgcFindings { codebase, filter }
    }
}
