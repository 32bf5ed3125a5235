//! Live stage discovery from Kubernetes workloads.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use kube::api::{Api, ListParams};
use kube::{Client, Resource};
use layerkeep_core::live::LiveImageProvider;
use layerkeep_core::{Error, Result, StageDigest};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use tracing::{debug, info};

/// Reports stages referenced by pods and pod templates in the cluster.
pub struct KubernetesLiveImages {
    client: Client,
    /// Restrict the scan to one namespace; all namespaces when unset.
    namespace: Option<String>,
}

impl KubernetesLiveImages {
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::StoreAccess(format!("Failed to create kube client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    async fn list<K>(&self) -> Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let kind = K::kind(&Default::default()).to_string();

        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::StoreAccess(format!("Failed to list {}: {}", kind, e)))?;
        debug!(kind = %kind, count = list.items.len(), "Listed workloads");

        Ok(list.items)
    }
}

#[async_trait]
impl LiveImageProvider for KubernetesLiveImages {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn list_live_digests(&self) -> Result<HashSet<StageDigest>> {
        let (pods, deployments, stateful_sets, daemon_sets, replica_sets, jobs, cron_jobs) =
            futures::try_join!(
                self.list::<Pod>(),
                self.list::<Deployment>(),
                self.list::<StatefulSet>(),
                self.list::<DaemonSet>(),
                self.list::<ReplicaSet>(),
                self.list::<Job>(),
                self.list::<CronJob>(),
            )?;

        let mut images = HashSet::new();
        images.extend(pods.iter().flat_map(|p| pod_images(p.spec.as_ref())));
        images.extend(deployment_images(&deployments));
        images.extend(
            stateful_sets
                .iter()
                .flat_map(|s| pod_images(s.spec.as_ref().and_then(|s| s.template.spec.as_ref()))),
        );
        images.extend(
            daemon_sets
                .iter()
                .flat_map(|d| pod_images(d.spec.as_ref().and_then(|s| s.template.spec.as_ref()))),
        );
        images.extend(replica_sets.iter().flat_map(|r| {
            pod_images(
                r.spec
                    .as_ref()
                    .and_then(|s| s.template.as_ref())
                    .and_then(|t| t.spec.as_ref()),
            )
        }));
        images.extend(
            jobs.iter()
                .flat_map(|j| pod_images(j.spec.as_ref().and_then(|s| s.template.spec.as_ref()))),
        );
        images.extend(cron_jobs.iter().flat_map(cron_job_images));

        let digests: HashSet<StageDigest> = images
            .iter()
            .filter_map(|image| stage_digest_from_image(image))
            .collect();
        info!(
            images = images.len(),
            stages = digests.len(),
            "Collected live images"
        );

        Ok(digests)
    }
}

fn pod_images(spec: Option<&PodSpec>) -> impl Iterator<Item = String> + '_ {
    spec.into_iter()
        .flat_map(|spec| spec.containers.iter().chain(spec.init_containers.iter().flatten()))
        .filter_map(|container| container.image.clone())
}

fn deployment_images(deployments: &[Deployment]) -> impl Iterator<Item = String> + '_ {
    deployments
        .iter()
        .flat_map(|d| pod_images(d.spec.as_ref().and_then(|s| s.template.spec.as_ref())))
}

fn cron_job_images(cron_job: &CronJob) -> impl Iterator<Item = String> + '_ {
    pod_images(
        cron_job
            .spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|j| j.template.spec.as_ref()),
    )
}

/// Stage digest encoded in an image reference.
///
/// Stage images are tagged `<digest>` or `<digest>-<unix millis>`. References
/// without a tag carry no stage digest.
pub fn stage_digest_from_image(image: &str) -> Option<StageDigest> {
    let image = image.split('@').next()?;
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (_, tag) = image[name_start..].rsplit_once(':')?;

    let digest = match tag.rsplit_once('-') {
        Some((digest, millis))
            if !digest.is_empty()
                && !millis.is_empty()
                && millis.bytes().all(|b| b.is_ascii_digit()) =>
        {
            digest
        }
        _ => tag,
    };

    (!digest.is_empty()).then(|| StageDigest::from(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_from_tag() {
        assert_eq!(
            stage_digest_from_image("registry.local/app:3f2a9c-1700000000000"),
            Some(StageDigest::from("3f2a9c"))
        );
        assert_eq!(
            stage_digest_from_image("registry.local:5000/team/app:3f2a9c"),
            Some(StageDigest::from("3f2a9c"))
        );
        assert_eq!(
            stage_digest_from_image("app:3f2a9c-1700000000000@sha256:abcdef"),
            Some(StageDigest::from("3f2a9c"))
        );
    }

    #[test]
    fn test_untagged_references_have_no_digest() {
        assert_eq!(stage_digest_from_image("registry.local:5000/app"), None);
        assert_eq!(stage_digest_from_image("app@sha256:abcdef"), None);
        assert_eq!(stage_digest_from_image("app:"), None);
    }

    #[test]
    fn test_non_numeric_suffix_is_part_of_digest() {
        assert_eq!(
            stage_digest_from_image("app:abc-def"),
            Some(StageDigest::from("abc-def"))
        );
    }

    #[test]
    fn test_deployment_images_include_init_containers() {
        let deployment: Deployment = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {
                "selector": {},
                "template": {
                    "spec": {
                        "initContainers": [{"name": "migrate", "image": "app:aaa-1"}],
                        "containers": [{"name": "web", "image": "app:bbb-2"}]
                    }
                }
            }
        }))
        .unwrap();

        let mut images: Vec<String> = deployment_images(std::slice::from_ref(&deployment)).collect();
        images.sort();
        assert_eq!(images, vec!["app:aaa-1", "app:bbb-2"]);
    }

    #[test]
    fn test_cron_job_template_images() {
        let cron_job: CronJob = serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "CronJob",
            "metadata": {"name": "report"},
            "spec": {
                "schedule": "0 * * * *",
                "jobTemplate": {
                    "spec": {
                        "template": {
                            "spec": {
                                "containers": [{"name": "report", "image": "app:ccc"}]
                            }
                        }
                    }
                }
            }
        }))
        .unwrap();

        let images: Vec<String> = cron_job_images(&cron_job).collect();
        assert_eq!(images, vec!["app:ccc"]);
    }
}
