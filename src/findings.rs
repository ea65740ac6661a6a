//! Results of enumeration probes and payload deliveries.

use std::fmt;

use crate::response::{RejectionKind, ResponseClass};

/// `readString` refuses objects with this before deserializing them.
pub const STRING_ONLY_MESSAGE: &str = "Cannot cast an object to java.lang.String";

/// One best-effort check. A probe that could not be completed records why
/// instead of failing the whole enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Done(T),
    /// The target answered, but not in a way the probe can interpret.
    Inconclusive(String),
    Failed(String),
}

impl<T> Probe<T> {
    pub fn done(&self) -> Option<&T> {
        match self {
            Probe::Done(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Probe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Done(value) => write!(f, "{}", value),
            Probe::Inconclusive(reason) => write!(f, "inconclusive: {}", reason),
            Probe::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// What happened to an argument sent to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The argument was deserialized.
    Delivered,
    /// A deserialization filter rejected it.
    Filtered,
    /// The class was looked up but not found.
    ClassMissing,
    /// Remote class loading is off because no security manager is installed.
    LoaderDisabled,
    /// A security manager refused remote class loading.
    LoaderDenied,
    /// The parameter is read as a string, so no object was deserialized.
    StringOnly,
    AccessDenied,
    /// The object or method is not there.
    NotExposed,
    Unexpected(String),
}

impl DeliveryOutcome {
    pub fn from_response(response: &ResponseClass) -> Self {
        let rejection = match response {
            ResponseClass::Success(_) | ResponseClass::RemoteFault(_) => {
                return DeliveryOutcome::Delivered
            }
            ResponseClass::ProtocolRejection(rejection) => rejection,
        };
        match rejection.kind {
            RejectionKind::TypeMismatch
                if rejection.exception.mentions(STRING_ONLY_MESSAGE) =>
            {
                DeliveryOutcome::StringOnly
            }
            RejectionKind::TypeMismatch => DeliveryOutcome::Delivered,
            RejectionKind::FilterRejected => DeliveryOutcome::Filtered,
            RejectionKind::ClassNotFound => {
                let exception = &rejection.exception;
                if exception.mentions("no security manager: RMI class loader disabled") {
                    DeliveryOutcome::LoaderDisabled
                } else if exception.mentions("access to class loader denied")
                    || exception.mentions("access denied")
                {
                    DeliveryOutcome::LoaderDenied
                } else {
                    DeliveryOutcome::ClassMissing
                }
            }
            RejectionKind::AccessDenied => DeliveryOutcome::AccessDenied,
            RejectionKind::NoSuchObject | RejectionKind::UnknownMethod => {
                DeliveryOutcome::NotExposed
            }
            RejectionKind::Unmarshal => {
                DeliveryOutcome::Unexpected(rejection.exception.to_string())
            }
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Filtered => write!(f, "rejected by deserialization filter"),
            DeliveryOutcome::ClassMissing => write!(f, "class not found"),
            DeliveryOutcome::LoaderDisabled => {
                write!(f, "RMI class loader disabled (no security manager)")
            }
            DeliveryOutcome::LoaderDenied => write!(f, "class loading denied by security manager"),
            DeliveryOutcome::StringOnly => write!(f, "parameter is read as a plain string"),
            DeliveryOutcome::AccessDenied => write!(f, "access denied"),
            DeliveryOutcome::NotExposed => write!(f, "not exposed"),
            DeliveryOutcome::Unexpected(exception) => write!(f, "unexpected: {}", exception),
        }
    }
}

/// Whether a call got past dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(RejectionKind),
}

impl Admission {
    pub fn from_response(response: &ResponseClass) -> Self {
        match response.rejection_kind() {
            Some(kind) => Admission::Rejected(kind),
            None => Admission::Accepted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMarshalling {
    /// Bound names are read with `readObject`, so any object reaches the
    /// deserializer through `lookup`.
    ReadObject,
    /// Bound names are read with `readString`.
    ReadString,
}

impl fmt::Display for StringMarshalling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringMarshalling::ReadObject => write!(f, "readObject (arbitrary objects accepted)"),
            StringMarshalling::ReadString => write!(f, "readString"),
        }
    }
}

/// The same administrative call made normally and with a loopback origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalhostBypass {
    pub plain: Admission,
    pub spoofed: Admission,
}

impl LocalhostBypass {
    pub fn bypass_possible(&self) -> bool {
        self.spoofed == Admission::Accepted
    }
}

impl fmt::Display for LocalhostBypass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bypass_possible() {
            if self.plain == Admission::Accepted {
                write!(f, "no localhost restriction")
            } else {
                write!(f, "bypass possible")
            }
        } else {
            write!(f, "not vulnerable ({:?})", self.spoofed)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Present,
    Absent,
}

impl FilterStatus {
    /// Interprets the reply to a call carrying a class outside every
    /// built-in allow list.
    pub fn from_response(response: &ResponseClass) -> Probe<FilterStatus> {
        match DeliveryOutcome::from_response(response) {
            DeliveryOutcome::Filtered => Probe::Done(FilterStatus::Present),
            DeliveryOutcome::Delivered => Probe::Done(FilterStatus::Absent),
            other => Probe::Inconclusive(other.to_string()),
        }
    }
}

impl fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStatus::Present => write!(f, "deserialization filter present"),
            FilterStatus::Absent => write!(f, "no deserialization filter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivatorStatus {
    Present,
    Absent,
}

impl fmt::Display for ActivatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivatorStatus::Present => write!(f, "activator present"),
            ActivatorStatus::Absent => write!(f, "no activator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryFindings {
    pub string_marshalling: Probe<StringMarshalling>,
    pub codebase: Probe<DeliveryOutcome>,
    pub localhost_bypass: Probe<LocalhostBypass>,
    pub filter: Probe<FilterStatus>,
    /// Whether remote references pass the filter, which outbound JRMP
    /// filter bypasses depend on.
    pub ref_admission: Probe<DeliveryOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DgcFindings {
    pub codebase: Probe<DeliveryOutcome>,
    pub filter: Probe<FilterStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivatorFindings {
    pub status: Probe<ActivatorStatus>,
    /// Only checked when the activator is present.
    pub codebase: Option<Probe<DeliveryOutcome>>,
    pub filter: Option<Probe<FilterStatus>>,
}
