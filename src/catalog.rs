//! Well-known remote interfaces.

use crate::candidate::MethodCandidate;

#[derive(Debug)]
pub struct KnownInterface {
    pub class_name: &'static str,
    pub description: &'static str,
    /// Stub and implementation class names that identify the interface.
    pub aliases: &'static [&'static str],
    /// Bound names the interface is conventionally registered under.
    pub bound_names: &'static [&'static str],
    pub methods: &'static [&'static str],
}

impl KnownInterface {
    pub fn candidates(&self) -> Vec<MethodCandidate> {
        self.methods
            .iter()
            .filter_map(|signature| MethodCandidate::parse(signature).ok())
            .collect()
    }

    fn matches_class(&self, class_name: &str) -> bool {
        self.class_name == class_name || self.aliases.contains(&class_name)
    }
}

pub static KNOWN_INTERFACES: &[KnownInterface] = &[
    KnownInterface {
        class_name: "java.rmi.registry.Registry",
        description: "RMI registry",
        aliases: &["sun.rmi.registry.RegistryImpl_Stub", "sun.rmi.registry.RegistryImpl"],
        bound_names: &[],
        methods: &[
            "void bind(String name, java.rmi.Remote obj)",
            "String[] list()",
            "java.rmi.Remote lookup(String name)",
            "void rebind(String name, java.rmi.Remote obj)",
            "void unbind(String name)",
        ],
    },
    KnownInterface {
        class_name: "javax.management.remote.rmi.RMIServer",
        description: "JMX connector server",
        aliases: &[
            "javax.management.remote.rmi.RMIServerImpl_Stub",
            "javax.management.remote.rmi.RMIJRMPServerImpl",
        ],
        bound_names: &["jmxrmi"],
        methods: &[
            "String getVersion()",
            "javax.management.remote.rmi.RMIConnection newClient(Object credentials)",
        ],
    },
    KnownInterface {
        class_name: "javax.management.remote.rmi.RMIConnection",
        description: "JMX connection",
        aliases: &["javax.management.remote.rmi.RMIConnectionImpl_Stub"],
        bound_names: &[],
        methods: &[
            "String getConnectionId()",
            "void close()",
            "Integer getMBeanCount(javax.security.auth.Subject delegationSubject)",
            "String getDefaultDomain(javax.security.auth.Subject delegationSubject)",
            "String[] getDomains(javax.security.auth.Subject delegationSubject)",
            "boolean isRegistered(javax.management.ObjectName name, javax.security.auth.Subject delegationSubject)",
            "void unregisterMBean(javax.management.ObjectName name, javax.security.auth.Subject delegationSubject)",
        ],
    },
    KnownInterface {
        class_name: "java.rmi.activation.ActivationSystem",
        description: "RMI activation system",
        aliases: &["sun.rmi.server.Activation$ActivationSystemImpl_Stub"],
        bound_names: &["java.rmi.activation.ActivationSystem"],
        methods: &[
            "java.rmi.activation.ActivationID registerObject(java.rmi.activation.ActivationDesc desc)",
            "void unregisterObject(java.rmi.activation.ActivationID id)",
            "java.rmi.activation.ActivationGroupID registerGroup(java.rmi.activation.ActivationGroupDesc desc)",
            "void unregisterGroup(java.rmi.activation.ActivationGroupID id)",
            "java.rmi.activation.ActivationDesc getActivationDesc(java.rmi.activation.ActivationID id)",
            "void shutdown()",
        ],
    },
    KnownInterface {
        class_name: "java.rmi.activation.Activator",
        description: "RMI activator",
        aliases: &["sun.rmi.server.Activation$ActivatorImpl_Stub"],
        bound_names: &[],
        methods: &["java.rmi.MarshalledObject activate(java.rmi.activation.ActivationID id, boolean force)"],
    },
    KnownInterface {
        class_name: "java.rmi.dgc.DGC",
        description: "distributed garbage collector",
        aliases: &["sun.rmi.transport.DGCImpl_Stub"],
        bound_names: &[],
        methods: &[
            "void clean(java.rmi.server.ObjID[] ids, long seqNum, java.rmi.dgc.VMID vmid, boolean strong)",
            "java.rmi.dgc.Lease dirty(java.rmi.server.ObjID[] ids, long seqNum, java.rmi.dgc.Lease lease)",
        ],
    },
];

pub fn by_class(class_name: &str) -> Option<&'static KnownInterface> {
    KNOWN_INTERFACES
        .iter()
        .find(|known| known.matches_class(class_name))
}

pub fn by_bound_name(bound_name: &str) -> Option<&'static KnownInterface> {
    KNOWN_INTERFACES
        .iter()
        .find(|known| known.bound_names.contains(&bound_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_signature_parses() {
        for known in KNOWN_INTERFACES {
            assert_eq!(
                known.candidates().len(),
                known.methods.len(),
                "{}",
                known.class_name
            );
        }
    }

    #[test]
    fn registry_lookup_has_the_well_known_hash() {
        let registry = by_class("sun.rmi.registry.RegistryImpl_Stub").unwrap();
        let lookup = registry
            .candidates()
            .into_iter()
            .find(|method| method.name() == "lookup")
            .unwrap();
        assert_eq!(lookup.hash(), -7538657168040752697);
    }

    #[test]
    fn bound_name_heuristics() {
        assert_eq!(
            by_bound_name("jmxrmi").map(|known| known.class_name),
            Some("javax.management.remote.rmi.RMIServer")
        );
        assert!(by_bound_name("plain-server").is_none());
    }
}
