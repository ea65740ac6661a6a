//! Bound names of a registry and what they resolve to.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info, warn};

use crate::catalog::{self, KnownInterface};
use crate::error::RmgError;
use crate::reference::RemoteObjectRef;
use crate::registry::RegistryClient;
use crate::response::ResponseClass;
use crate::session::Session;

/// Where a bound name's class came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The reference itself names the class.
    Advertised(String),
    /// Matched a well-known interface by bound name.
    Catalog(&'static str),
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundName {
    pub name: String,
    /// `None` until resolved, or when the lookup failed.
    pub reference: Option<RemoteObjectRef>,
    /// Class name as advertised by the reference.
    pub declared_class: Option<String>,
    pub resolution: Resolution,
}

impl BoundName {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: None,
            declared_class: None,
            resolution: Resolution::Unresolved,
        }
    }

    pub fn resolved_class(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Advertised(class_name) => Some(class_name),
            Resolution::Catalog(class_name) => Some(class_name),
            Resolution::Unresolved => None,
        }
    }

    pub fn known_interface(&self) -> Option<&'static KnownInterface> {
        self.resolved_class().and_then(catalog::by_class)
    }
}

impl fmt::Display for BoundName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (&self.resolution, self.known_interface()) {
            (Resolution::Unresolved, _) => write!(f, " (unknown class)"),
            (Resolution::Catalog(class_name), _) => write!(f, " ({}, by name)", class_name),
            (Resolution::Advertised(class_name), Some(known)) => {
                write!(f, " ({}, {})", class_name, known.description)
            }
            (Resolution::Advertised(class_name), None) => write!(f, " ({})", class_name),
        }?;
        if let Some(reference) = &self.reference {
            write!(f, " at {}", reference.endpoint)?;
        }
        Ok(())
    }
}

/// Resolves `name` from an optional decoded reference.
fn resolve(name: &str, reference: Option<RemoteObjectRef>) -> BoundName {
    let declared_class = reference
        .as_ref()
        .and_then(|reference| reference.class_name())
        .map(str::to_owned);
    let resolution = match &declared_class {
        Some(class_name) => Resolution::Advertised(class_name.clone()),
        None => match catalog::by_bound_name(name) {
            Some(known) => Resolution::Catalog(known.class_name),
            None => Resolution::Unresolved,
        },
    };
    BoundName {
        name: name.to_owned(),
        reference,
        declared_class,
        resolution,
    }
}

/// The bound names of one registry, built once per run.
pub struct Directory {
    registry: RegistryClient,
    names: Vec<String>,
    entries: Vec<BoundName>,
    codebases: BTreeSet<String>,
}

impl Directory {
    /// Lists the registry behind `session`. Fails with `RegistryUnavailable`
    /// when nothing answers `list` like a registry.
    pub async fn locate(session: Session) -> Result<Self, RmgError> {
        let mut registry = RegistryClient::new(session);
        let names = registry.list().await?;
        info!(endpoint = %registry.endpoint(), count = names.len(), "listed bound names");
        Ok(Self {
            registry,
            names,
            entries: Vec::new(),
            codebases: BTreeSet::new(),
        })
    }

    pub fn registry(&self) -> &RegistryClient {
        &self.registry
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Bound names, restricted to `filter` when one is given. Names in the
    /// filter that are not bound are skipped.
    pub fn list_bound_names(&self, filter: Option<&[String]>) -> Vec<BoundName> {
        match filter {
            None => self.names.iter().map(BoundName::unresolved).collect(),
            Some(filter) => {
                for missing in filter.iter().filter(|name| !self.names.contains(*name)) {
                    warn!(bound_name = %missing, "not bound on the registry");
                }
                self.names
                    .iter()
                    .filter(|name| filter.contains(*name))
                    .map(BoundName::unresolved)
                    .collect()
            }
        }
    }

    /// Looks every name up and records the result. A failed lookup leaves
    /// the name without a reference.
    pub async fn resolve_classes(&mut self, names: Vec<BoundName>) -> Vec<BoundName> {
        let mut resolved = Vec::with_capacity(names.len());
        for bound in names {
            if let Some(known) = self.get(&bound.name) {
                resolved.push(known.clone());
                continue;
            }
            let reference = self.lookup(&bound.name).await;
            let entry = resolve(&bound.name, reference);
            debug!(bound_name = %entry.name, resolution = ?entry.resolution, "resolved");
            self.entries.push(entry.clone());
            resolved.push(entry);
        }
        resolved
    }

    async fn lookup(&mut self, name: &str) -> Option<RemoteObjectRef> {
        let frame = match self.registry.lookup(name).await {
            Ok(ResponseClass::Success(frame)) => frame,
            Ok(other) => {
                warn!(bound_name = name, response = %other, "lookup failed");
                return None;
            }
            Err(err) => {
                warn!(bound_name = name, error = %err, "lookup failed");
                return None;
            }
        };
        self.codebases.extend(frame.codebases().iter().cloned());
        match RemoteObjectRef::decode(&frame, self.registry.endpoint()) {
            Ok(reference) => Some(reference),
            Err(err) => {
                warn!(bound_name = name, error = %err, "bound object is not a remote reference");
                None
            }
        }
    }

    pub fn entries(&self) -> &[BoundName] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&BoundName> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Codebases the server annotated its replies with.
    pub fn codebases(&self) -> impl Iterator<Item = &str> {
        self.codebases.iter().map(String::as_str)
    }
}
