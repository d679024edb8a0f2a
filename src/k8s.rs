use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::collections::HashMap;
use tracing::debug;

use crate::model::{ContainerInfo, WorkloadRef};

/// Read-only view of the cluster used to list a pod's containers.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster_url: String,
    default_namespace: String,
}

impl KubeGateway {
    pub async fn connect(context: Option<String>) -> Result<Self> {
        Self::from_kube_selection(context).await
    }

    /// Kube context name, used as the dashboard cluster id unless overridden.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn from_kube_selection(context: Option<String>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().ok();

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if context.is_some() {
                anyhow::bail!("kubeconfig not found; --context is unavailable in this environment");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster_url = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;

        let active_context = context
            .or_else(|| {
                kubeconfig
                    .as_ref()
                    .and_then(|cfg| cfg.current_context.clone())
            })
            .unwrap_or_else(|| "in-cluster".to_string());
        debug!(context = %active_context, cluster = %cluster_url, "kubernetes client ready");

        Ok(Self {
            client,
            context: active_context,
            cluster_url,
            default_namespace,
        })
    }

    pub async fn workload(
        &self,
        cluster: &str,
        namespace: &str,
        pod_name: &str,
    ) -> Result<WorkloadRef> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods
            .get(pod_name)
            .await
            .with_context(|| format!("failed to fetch pod {namespace}/{pod_name}"))?;

        Ok(WorkloadRef {
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: pod_name.to_string(),
            containers: pod_containers(&pod),
        })
    }
}

/// Shell-capable containers of a pod in declaration order, merged with
/// their runtime status. Init containers are left out.
pub fn pod_containers(pod: &Pod) -> Vec<ContainerInfo> {
    let pod_age = human_age(pod.metadata.creation_timestamp.as_ref());

    let mut statuses = HashMap::<String, ContainerInfo>::new();
    if let Some(status) = pod.status.as_ref() {
        for container in status.container_statuses.as_ref().into_iter().flatten() {
            statuses.insert(
                container.name.clone(),
                container_from_status(container, &pod_age),
            );
        }
    }

    let mut rows = Vec::new();
    if let Some(spec) = pod.spec.as_ref() {
        for container in &spec.containers {
            let mut info = statuses
                .remove(&container.name)
                .unwrap_or_else(|| ContainerInfo::named(container.name.clone()));
            if info.image.is_empty() || info.image == "-" {
                info.image = container.image.clone().unwrap_or_else(|| "-".to_string());
            }
            if info.age.is_empty() || info.age == "-" {
                info.age = pod_age.clone();
            }
            rows.push(info);
        }
    }

    if rows.is_empty() {
        let mut fallback = statuses.into_values().collect::<Vec<_>>();
        fallback.sort_by(|left, right| left.name.cmp(&right.name));
        rows = fallback;
    }

    rows
}

fn container_from_status(container: &ContainerStatus, pod_age: &str) -> ContainerInfo {
    let state = container.state.as_ref();
    let running = state.and_then(|state| state.running.as_ref());
    let label = match (
        running,
        state.and_then(|state| state.waiting.as_ref()),
        state.and_then(|state| state.terminated.as_ref()),
    ) {
        (Some(_), _, _) => "Running".to_string(),
        (None, Some(waiting), _) => non_empty_reason(waiting.reason.as_deref(), "Waiting"),
        (None, None, Some(terminated)) => {
            non_empty_reason(terminated.reason.as_deref(), "Terminated")
        }
        (None, None, None) => "Unknown".to_string(),
    };
    let age = running
        .and_then(|running| running.started_at.as_ref())
        .map(|started| human_age(Some(started)))
        .unwrap_or_else(|| pod_age.to_string());

    ContainerInfo {
        name: container.name.clone(),
        image: container.image.clone(),
        ready: container.ready,
        state: label,
        restarts: container.restart_count.max(0) as u32,
        age,
    }
}

fn non_empty_reason(reason: Option<&str>, fallback: &str) -> String {
    reason
        .filter(|reason| !reason.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn human_age(timestamp: Option<&Time>) -> String {
    match timestamp {
        Some(timestamp) => format_elapsed_seconds(
            k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second(),
        ),
        None => "-".to_string(),
    }
}

/// Largest whole unit of an elapsed duration, kubectl style.
fn format_elapsed_seconds(seconds: i64) -> String {
    const UNITS: [(i64, &str); 3] = [(86_400, "d"), (3_600, "h"), (60, "m")];
    let seconds = seconds.max(0);
    UNITS
        .iter()
        .find(|(size, _)| seconds >= *size)
        .map(|(size, unit)| format!("{}{unit}", seconds / size))
        .unwrap_or_else(|| format!("{seconds}s"))
}

#[cfg(test)]
mod tests {
    use super::{container_from_status, format_elapsed_seconds, pod_containers};
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateTerminated, ContainerStateWaiting,
        ContainerStatus, Pod, PodSpec, PodStatus,
    };

    fn container(name: &str, image: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ..Container::default()
        }
    }

    #[test]
    fn containers_follow_declaration_order_with_status() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![
                    container("app", "shop/api:1.2"),
                    container("proxy", "envoy:1.30"),
                ],
                init_containers: Some(vec![container("migrate", "shop/migrate:1.2")]),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "proxy".to_string(),
                    image: "envoy:1.30".to_string(),
                    ready: false,
                    restart_count: 4,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("CrashLoopBackOff".to_string()),
                            ..ContainerStateWaiting::default()
                        }),
                        ..ContainerState::default()
                    }),
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        };

        let containers = pod_containers(&pod);
        let names = containers
            .iter()
            .map(|info| info.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["app", "proxy"]);
        assert_eq!(containers[0].image, "shop/api:1.2");
        assert_eq!(containers[0].state, "Unknown");
        assert_eq!(containers[1].state, "CrashLoopBackOff");
        assert_eq!(containers[1].restarts, 4);
        assert!(!containers[1].ready);
    }

    #[test]
    fn terminated_without_reason_falls_back_to_label() {
        let status = ContainerStatus {
            name: "job".to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 1,
                    ..ContainerStateTerminated::default()
                }),
                ..ContainerState::default()
            }),
            ..ContainerStatus::default()
        };

        let info = container_from_status(&status, "3h");
        assert_eq!(info.state, "Terminated");
        assert_eq!(info.age, "3h");
    }

    #[test]
    fn pod_without_spec_has_no_containers() {
        assert!(pod_containers(&Pod::default()).is_empty());
    }

    #[test]
    fn elapsed_seconds_use_largest_unit() {
        assert_eq!(format_elapsed_seconds(42), "42s");
        assert_eq!(format_elapsed_seconds(125), "2m");
        assert_eq!(format_elapsed_seconds(7_300), "2h");
        assert_eq!(format_elapsed_seconds(200_000), "2d");
        assert_eq!(format_elapsed_seconds(-5), "0s");
    }
}
