use std::fmt::{Display, Formatter};
use thiserror::Error;
use url::Url;

use crate::model::{Credential, SessionTarget, WorkloadRef};

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TargetError {
    #[error("workload {0} declares no containers")]
    NoContainers(String),
    #[error("container '{container}' is not declared by {workload}")]
    UnknownContainer { workload: String, container: String },
    #[error("{0} is not set")]
    MissingField(&'static str),
    #[error("invalid server address '{address}': {reason}")]
    InvalidServer { address: String, reason: String },
    #[error("unsupported server scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}

/// Connection address of one shell session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ShellAddress(Url);

impl ShellAddress {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The address with the token query parameter masked, for logs and the UI.
    pub fn redacted(&self) -> String {
        let mut masked = self.0.clone();
        let pairs = self
            .0
            .query_pairs()
            .map(|(key, value)| {
                if key == "token" {
                    (key.into_owned(), "***".to_string())
                } else {
                    (key.into_owned(), value.into_owned())
                }
            })
            .collect::<Vec<_>>();
        masked.query_pairs_mut().clear().extend_pairs(pairs);
        masked.to_string()
    }
}

impl Display for ShellAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Builds shell endpoint addresses relative to the dashboard server.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TargetResolver {
    base: Url,
}

impl TargetResolver {
    pub fn new(server: &str) -> Result<Self, TargetError> {
        let trimmed = server.trim();
        if trimmed.is_empty() {
            return Err(TargetError::MissingField("server"));
        }
        let mut base = Url::parse(trimmed).map_err(|error| TargetError::InvalidServer {
            address: trimmed.to_string(),
            reason: error.to_string(),
        })?;
        if base.cannot_be_a_base() || base.host_str().is_none() {
            return Err(TargetError::InvalidServer {
                address: trimmed.to_string(),
                reason: "missing host".to_string(),
            });
        }

        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(TargetError::UnsupportedScheme(other.to_string())),
        };
        if base.scheme() != scheme {
            base.set_scheme(scheme)
                .map_err(|()| TargetError::UnsupportedScheme(base.scheme().to_string()))?;
        }
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Validates the selection against the workload and freezes it into a
    /// target. An unset container defaults to the first declared one.
    pub fn target(
        &self,
        workload: &WorkloadRef,
        container: Option<&str>,
        shell: &str,
        credential: &Credential,
    ) -> Result<SessionTarget, TargetError> {
        let Some(first) = workload.containers.first() else {
            return Err(TargetError::NoContainers(workload.qualified_name()));
        };

        let container = match container.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) if workload.declares(name) => name.to_string(),
            Some(name) => {
                return Err(TargetError::UnknownContainer {
                    workload: workload.qualified_name(),
                    container: name.to_string(),
                });
            }
            None => first.name.clone(),
        };

        let target = SessionTarget {
            cluster: workload.cluster.trim().to_string(),
            namespace: workload.namespace.trim().to_string(),
            pod: workload.name.trim().to_string(),
            container,
            shell: shell.trim().to_string(),
            credential: credential.clone(),
        };
        validate_fields(&target)?;
        Ok(target)
    }

    /// Pure address construction for an already validated target.
    pub fn address(&self, target: &SessionTarget) -> ShellAddress {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "api",
                "v1",
                "clusters",
                target.cluster.as_str(),
                "namespaces",
                target.namespace.as_str(),
                "pods",
                target.pod.as_str(),
                "shell",
            ]);
        }
        url.query_pairs_mut()
            .append_pair("container", &target.container)
            .append_pair("shell", &target.shell)
            .append_pair("token", target.credential.expose());
        ShellAddress(url)
    }

    /// Re-checks a target that was built elsewhere before its address is used.
    pub fn checked_address(&self, target: &SessionTarget) -> Result<ShellAddress, TargetError> {
        validate_fields(target)?;
        if target.container.is_empty() {
            return Err(TargetError::MissingField("container"));
        }
        Ok(self.address(target))
    }
}

fn validate_fields(target: &SessionTarget) -> Result<(), TargetError> {
    let fields = [
        ("cluster", target.cluster.as_str()),
        ("namespace", target.namespace.as_str()),
        ("pod", target.pod.as_str()),
        ("shell", target.shell.as_str()),
        ("credential", target.credential.expose()),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(TargetError::MissingField(name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ShellAddress, TargetError, TargetResolver};
    use crate::model::{ContainerInfo, Credential, WorkloadRef};
    use url::Url;

    fn workload(containers: &[&str]) -> WorkloadRef {
        WorkloadRef {
            cluster: "c-m-1".to_string(),
            namespace: "payments".to_string(),
            name: "api-7d9f".to_string(),
            containers: containers
                .iter()
                .map(|name| ContainerInfo::named(*name))
                .collect(),
        }
    }

    fn resolve(
        resolver: &TargetResolver,
        workload: &WorkloadRef,
        container: Option<&str>,
        shell: &str,
        credential: &Credential,
    ) -> Result<ShellAddress, TargetError> {
        let target = resolver.target(workload, container, shell, credential)?;
        Ok(resolver.address(&target))
    }

    fn parsed(address: &ShellAddress) -> Url {
        Url::parse(address.as_str()).unwrap()
    }

    fn query(address: &ShellAddress, key: &str) -> Option<String> {
        parsed(address)
            .query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }

    #[test]
    fn builds_shell_address_with_path_and_query() {
        let resolver = TargetResolver::new("https://dash.example.com").unwrap();
        let address = resolve(
            &resolver,
            &workload(&["api", "envoy"]),
            Some("envoy"),
            "/bin/bash",
            &Credential::new("tok-123"),
        )
        .unwrap();

        let url = parsed(&address);
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("dash.example.com"));
        assert_eq!(
            url.path(),
            "/api/v1/clusters/c-m-1/namespaces/payments/pods/api-7d9f/shell"
        );
        assert_eq!(query(&address, "container").as_deref(), Some("envoy"));
        assert_eq!(query(&address, "shell").as_deref(), Some("/bin/bash"));
        assert_eq!(query(&address, "token").as_deref(), Some("tok-123"));
    }

    #[test]
    fn unset_container_defaults_to_first_declared() {
        let resolver = TargetResolver::new("http://localhost:8080").unwrap();
        let target = resolver
            .target(&workload(&["main", "sidecar"]), None, "/bin/sh", &Credential::new("t"))
            .unwrap();
        assert_eq!(target.container, "main");

        let blank = resolver
            .target(&workload(&["main"]), Some("  "), "/bin/sh", &Credential::new("t"))
            .unwrap();
        assert_eq!(blank.container, "main");
    }

    #[test]
    fn workload_without_containers_is_rejected() {
        let resolver = TargetResolver::new("http://localhost:8080").unwrap();
        let error = resolve(
            &resolver,
            &workload(&[]),
            None,
            "/bin/sh",
            &Credential::new("t"),
        )
        .unwrap_err();
        assert_eq!(error, TargetError::NoContainers("payments/api-7d9f".to_string()));
    }

    #[test]
    fn undeclared_container_is_rejected() {
        let resolver = TargetResolver::new("http://localhost:8080").unwrap();
        let error = resolve(
            &resolver,
            &workload(&["api"]),
            Some("db"),
            "/bin/sh",
            &Credential::new("t"),
        )
        .unwrap_err();
        assert!(matches!(error, TargetError::UnknownContainer { .. }));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let resolver = TargetResolver::new("http://localhost:8080").unwrap();
        let error = resolve(
            &resolver,
            &workload(&["api"]),
            None,
            "/bin/sh",
            &Credential::new(""),
        )
        .unwrap_err();
        assert_eq!(error, TargetError::MissingField("credential"));

        let error = resolve(
            &resolver,
            &workload(&["api"]),
            None,
            " ",
            &Credential::new("t"),
        )
        .unwrap_err();
        assert_eq!(error, TargetError::MissingField("shell"));

        let mut unnamed = workload(&["api"]);
        unnamed.namespace.clear();
        let error = resolve(
            &resolver,
            &unnamed,
            None,
            "/bin/sh",
            &Credential::new("t"),
        )
        .unwrap_err();
        assert_eq!(error, TargetError::MissingField("namespace"));
    }

    #[test]
    fn server_scheme_is_mapped_and_prefix_preserved() {
        let resolver = TargetResolver::new("http://proxy.local/k8s/dashboard/").unwrap();
        assert_eq!(resolver.base().scheme(), "ws");
        let address = resolve(
            &resolver,
            &workload(&["api"]),
            None,
            "/bin/sh",
            &Credential::new("t"),
        )
        .unwrap();
        assert!(
            parsed(&address)
                .path()
                .starts_with("/k8s/dashboard/api/v1/clusters/c-m-1/")
        );

        assert_eq!(
            TargetResolver::new("ftp://example.com").unwrap_err(),
            TargetError::UnsupportedScheme("ftp".to_string())
        );
        assert!(matches!(
            TargetResolver::new("not a url").unwrap_err(),
            TargetError::InvalidServer { .. }
        ));
        assert_eq!(
            TargetResolver::new("").unwrap_err(),
            TargetError::MissingField("server")
        );
    }

    #[test]
    fn query_values_are_percent_encoded() {
        let resolver = TargetResolver::new("wss://dash.example.com").unwrap();
        let address = resolve(
            &resolver,
            &workload(&["api"]),
            None,
            "/bin/sh",
            &Credential::new("a+b/c=d&e"),
        )
        .unwrap();
        assert!(!address.as_str().contains("a+b/c=d&e"));
        assert_eq!(query(&address, "token").as_deref(), Some("a+b/c=d&e"));
    }

    #[test]
    fn redacted_address_hides_token() {
        let resolver = TargetResolver::new("https://dash.example.com").unwrap();
        let address = resolve(
            &resolver,
            &workload(&["api"]),
            None,
            "/bin/sh",
            &Credential::new("very-secret"),
        )
        .unwrap();
        let shown = address.to_string();
        assert!(!shown.contains("very-secret"));
        assert!(shown.contains("container=api"));
        assert!(address.as_str().contains("very-secret"));
    }
}
