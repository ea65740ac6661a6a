use std::fmt;
use std::str::FromStr;

use crate::error::RmgError;

/// A host and port speaking JRMP, plus how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// Whether references naming another host are followed to that host.
    pub follow_redirect: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            follow_redirect: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_follow_redirect(mut self, follow_redirect: bool) -> Self {
        self.follow_redirect = follow_redirect;
        self
    }

    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Where to call an object whose reference advertises `host:port`.
    ///
    /// Servers often advertise an internal address, so unless redirects are
    /// followed the call stays on this endpoint's host.
    pub fn redirect(&self, host: &str, port: u16, tls: bool) -> Endpoint {
        let host = if self.follow_redirect || host == self.host {
            host.to_owned()
        } else {
            self.host.clone()
        };
        Endpoint {
            host,
            port,
            tls: tls || self.tls,
            follow_redirect: self.follow_redirect,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())?;
        if self.tls {
            write!(f, " (tls)")?;
        }
        Ok(())
    }
}

/// `host:port` of a listener a new binding should point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    pub host: String,
    pub port: u16,
}

impl FromStr for ListenerSpec {
    type Err = RmgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RmgError::invalid_input(format!("listener '{}' is not host:port", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(RmgError::invalid_input(format!(
                "listener '{}' has an empty host",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|&port| port != 0)
            .ok_or_else(|| RmgError::invalid_input(format!("listener '{}' has a bad port", s)))?;
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_stays_on_target_host() {
        let target = Endpoint::new("172.17.0.2", 1090);
        let moved = target.redirect("10.0.0.7", 40001, false);
        assert_eq!(moved.host, "172.17.0.2");
        assert_eq!(moved.port, 40001);

        let followed = target
            .with_follow_redirect(true)
            .redirect("10.0.0.7", 40001, true);
        assert_eq!(followed.host, "10.0.0.7");
        assert!(followed.tls);
    }

    #[test]
    fn parses_listener_specs() {
        let spec: ListenerSpec = "10.0.0.1:4444".parse().unwrap();
        assert_eq!(spec.host, "10.0.0.1");
        assert_eq!(spec.port, 4444);

        let v6: ListenerSpec = "[::1]:4444".parse().unwrap();
        assert_eq!(v6.host, "::1");

        for bad in ["10.0.0.1", ":4444", "host:0", "host:99999", "host:x"] {
            assert!(matches!(
                bad.parse::<ListenerSpec>(),
                Err(RmgError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn ipv6_address_is_bracketed() {
        assert_eq!(Endpoint::new("::1", 1099).address(), "[::1]:1099");
    }
}
