//! Calls on the activator, ObjID 1.

use rand::Rng;
use tracing::{debug, info};

use crate::call::{invoke, Argument, CallFrame, Selector};
use crate::candidate::{method_hash, Primitive, TypeDesc};
use crate::endpoint::Endpoint;
use crate::error::SessionError;
use crate::findings::{ActivatorFindings, ActivatorStatus, DeliveryOutcome, FilterStatus, Probe};
use crate::protocol::ObjId;
use crate::response::{RejectionKind, ResponseClass};
use crate::serial::JavaValue;
use crate::session::{ReturnKind, Session};

const ACTIVATE: &str = "activate(Ljava/rmi/activation/ActivationID;Z)Ljava/rmi/MarshalledObject;";

pub fn activate_selector() -> Selector {
    Selector::Method {
        hash: method_hash(ACTIVATE),
    }
}

pub struct ActivatorClient {
    session: Session,
}

impl ActivatorClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.session.endpoint()
    }

    /// Calls `activate` with `value` in the `ActivationID` slot.
    pub async fn deliver(&self, value: JavaValue) -> Result<ResponseClass, SessionError> {
        let mut session = self.session.fork();
        let frame = CallFrame::new(
            ObjId::ACTIVATOR,
            activate_selector(),
            vec![
                Argument::Value(value),
                Argument::Placeholder(TypeDesc::Primitive(Primitive::Boolean)),
            ],
        )
        .expecting(ReturnKind::Value);
        debug!(endpoint = %self.endpoint(), "delivering argument to activator");
        let result = invoke(&mut session, &frame).await;
        session.close().await;
        result
    }

    pub async fn probe_presence(&self) -> Probe<ActivatorStatus> {
        match self.deliver(JavaValue::Null).await {
            Ok(response) => match response.rejection_kind() {
                Some(RejectionKind::NoSuchObject) => Probe::Done(ActivatorStatus::Absent),
                None => Probe::Done(ActivatorStatus::Present),
                Some(_) => Probe::Inconclusive(response.to_string()),
            },
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    pub async fn probe_codebase(&self, codebase_url: &str) -> Probe<DeliveryOutcome> {
        let value = JavaValue::CodebaseClass {
            class_name: format!("rmg.Probe{:08x}", rand::thread_rng().gen::<u32>()),
            codebase: Some(codebase_url.to_owned()),
        };
        match self.deliver(value).await {
            Ok(response) => Probe::Done(DeliveryOutcome::from_response(&response)),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    pub async fn probe_filter(&self) -> Probe<FilterStatus> {
        match self.deliver(JavaValue::EmptyHashMap).await {
            Ok(response) => FilterStatus::from_response(&response),
            Err(err) => Probe::Failed(err.to_string()),
        }
    }

    /// Checks for the activator, and when it is there, its filter and
    /// codebase handling.
    pub async fn enumerate(&self, codebase_url: &str) -> ActivatorFindings {
        let status = self.probe_presence().await;
        info!(endpoint = %self.endpoint(), result = %status, "activator");
        if status.done() != Some(&ActivatorStatus::Present) {
            return ActivatorFindings {
                status,
                codebase: None,
                filter: None,
            };
        }
        let codebase = self.probe_codebase(codebase_url).await;
        info!(endpoint = %self.endpoint(), result = %codebase, "activator codebase");
        let filter = self.probe_filter().await;
        info!(endpoint = %self.endpoint(), result = %filter, "activator deserialization filter");
        ActivatorFindings {
            status,
            codebase: Some(codebase),
            filter: Some(filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockDialer, MockException, MockReply};
    use crate::session::SessionOptions;

    fn client(dialer: std::sync::Arc<MockDialer>) -> ActivatorClient {
        ActivatorClient::new(Session::new(
            Endpoint::new("target", 1098),
            dialer,
            SessionOptions::default(),
        ))
    }

    #[tokio::test]
    async fn activator_presence() {
        let absent = MockDialer::new(|_: &MockCall| MockReply::no_such_object());
        assert_eq!(
            client(absent).probe_presence().await,
            Probe::Done(ActivatorStatus::Absent)
        );

        let present = MockDialer::new(|call: &MockCall| {
            if call.obj_id == ObjId::ACTIVATOR && call.hash == method_hash(ACTIVATE) {
                MockReply::exception("java.lang.NullPointerException", "id")
            } else {
                MockReply::no_such_object()
            }
        });
        assert_eq!(
            client(present.clone()).probe_presence().await,
            Probe::Done(ActivatorStatus::Present)
        );
        assert_eq!(present.calls()[0].op, -1);
    }

    fn unmarshal(cause: MockException) -> MockReply {
        MockReply::Exception(MockException::server(
            MockException::new("java.rmi.UnmarshalException", "error unmarshalling arguments")
                .caused_by(cause),
        ))
    }

    #[tokio::test]
    async fn payload_goes_into_the_activation_id_slot() {
        let dialer = MockDialer::new(|_: &MockCall| {
            unmarshal(MockException::new(
                "java.lang.ClassCastException",
                "java.util.HashMap cannot be cast to java.rmi.activation.ActivationID",
            ))
        });
        let response = client(dialer.clone())
            .deliver(JavaValue::EmptyHashMap)
            .await
            .unwrap();
        assert_eq!(DeliveryOutcome::from_response(&response), DeliveryOutcome::Delivered);

        let call = &dialer.calls()[0];
        assert_eq!(call.obj_id, ObjId::ACTIVATOR);
        assert_eq!((call.op, call.hash), (-1, method_hash(ACTIVATE)));
        assert_eq!(call.object_class(0), Some("java.util.HashMap"));
    }

    #[tokio::test]
    async fn filtered_activator_reports_the_filter() {
        let dialer = MockDialer::new(|call: &MockCall| match call.object_class(0) {
            Some("java.util.HashMap") => unmarshal(MockException::new(
                "java.io.InvalidClassException",
                "filter status: REJECTED",
            )),
            Some(_) => unmarshal(MockException::new(
                "java.lang.ClassNotFoundException",
                "rmg.Probe (no security manager: RMI class loader disabled)",
            )),
            None => MockReply::exception("java.lang.NullPointerException", "id"),
        });
        let findings = client(dialer).enumerate("http://10.0.0.1:8000/").await;
        assert_eq!(findings.status, Probe::Done(ActivatorStatus::Present));
        assert_eq!(findings.filter, Some(Probe::Done(FilterStatus::Present)));
        assert_eq!(
            findings.codebase,
            Some(Probe::Done(DeliveryOutcome::LoaderDisabled))
        );
    }

    #[tokio::test]
    async fn missing_activator_skips_further_checks() {
        let dialer = MockDialer::new(|_: &MockCall| MockReply::no_such_object());
        let findings = client(dialer.clone()).enumerate("http://10.0.0.1:8000/").await;
        assert_eq!(findings.status, Probe::Done(ActivatorStatus::Absent));
        assert_eq!(findings.filter, None);
        assert_eq!(dialer.calls().len(), 1);
    }
}
