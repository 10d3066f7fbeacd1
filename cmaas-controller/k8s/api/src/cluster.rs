use crate::configmap::{is_ready, service_version, snapshot};
use anyhow::{Context, Result};
use cmaas_controller_core::{
    cluster::{cim_config_map_names, Map},
    ClusterOps, ConfigMapSnapshot, MICROSERVICE_LABEL,
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Pod},
};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// [`ClusterOps`] against the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterOps {
    client: kube::Client,
}

// === impl KubeClusterOps ===

impl KubeClusterOps {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn microservice_selector(microservice: &str) -> ListParams {
        ListParams::default().labels(&format!("{MICROSERVICE_LABEL}={microservice}"))
    }

    async fn pods(&self, ns: &str, microservice: &str, version: &str) -> Result<Vec<Pod>> {
        let api = Api::<Pod>::namespaced(self.client.clone(), ns);
        let pods = api
            .list(&Self::microservice_selector(microservice))
            .await
            .with_context(|| format!("listing pods of {microservice} in {ns}"))?;
        Ok(pods
            .items
            .into_iter()
            .filter(|p| service_version(&p.metadata) == version)
            .collect())
    }

    async fn deployments(&self, ns: &str, microservice: &str) -> Result<Vec<Deployment>> {
        let api = Api::<Deployment>::namespaced(self.client.clone(), ns);
        let deployments = api
            .list(&Self::microservice_selector(microservice))
            .await
            .with_context(|| format!("listing deployments of {microservice} in {ns}"))?;
        Ok(deployments.items)
    }
}

#[async_trait::async_trait]
impl ClusterOps for KubeClusterOps {
    async fn list_pods(&self, ns: &str, microservice: &str, version: &str) -> Result<Vec<String>> {
        let pods = self.pods(ns, microservice, version).await?;
        Ok(pods.iter().map(|p| p.name_any()).collect())
    }

    async fn list_ready_pods(
        &self,
        ns: &str,
        microservice: &str,
        version: &str,
    ) -> Result<Vec<String>> {
        let pods = self.pods(ns, microservice, version).await?;
        Ok(pods
            .iter()
            .filter(|p| is_ready(p))
            .map(|p| p.name_any())
            .collect())
    }

    async fn kill_pod(&self, ns: &str, pod: &str) -> Result<()> {
        let api = Api::<Pod>::namespaced(self.client.clone(), ns);
        match api.delete(pod, &DeleteParams::default()).await {
            Ok(_) => info!(namespace = %ns, %pod, "Killed pod"),
            Err(kube::Error::Api(error)) if error.code == 404 => {
                info!(namespace = %ns, %pod, "Pod not found")
            }
            Err(error) => return Err(error).with_context(|| format!("deleting pod {ns}/{pod}")),
        }
        Ok(())
    }

    async fn rollout_restart(&self, ns: &str, microservice: &str, version: &str) -> Result<()> {
        let deployments = self.deployments(ns, microservice).await?;
        if deployments.is_empty() {
            info!(namespace = %ns, %microservice, "No deployment found, killing pods instead");
            for pod in self.list_pods(ns, microservice, version).await? {
                self.kill_pod(ns, &pod).await?;
            }
            return Ok(());
        }

        let api = Api::<Deployment>::namespaced(self.client.clone(), ns);
        let patch = Patch::Merge(json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            RESTARTED_AT_ANNOTATION: chrono::Utc::now().to_rfc3339(),
                        }
                    }
                }
            }
        }));
        for deployment in deployments
            .iter()
            .filter(|d| service_version(&d.metadata).eq_ignore_ascii_case(version))
        {
            let name = deployment.name_any();
            info!(namespace = %ns, deployment = %name, "Restarting deployment");
            api.patch(&name, &PatchParams::default(), &patch)
                .await
                .with_context(|| format!("restarting deployment {ns}/{name}"))?;
        }
        Ok(())
    }

    async fn scale_deployment(&self, ns: &str, microservice: &str) -> Result<()> {
        let Some(deployment) = self.deployments(ns, microservice).await?.into_iter().next() else {
            info!(namespace = %ns, %microservice, "No deployment found");
            return Ok(());
        };
        let name = deployment.name_any();
        let replicas = deployment.spec.and_then(|s| s.replicas).unwrap_or(1);

        let api = Api::<Deployment>::namespaced(self.client.clone(), ns);
        let params = PatchParams::default();
        for count in [0, replicas] {
            debug!(namespace = %ns, deployment = %name, replicas = count, "Scaling deployment");
            api.patch_scale(&name, &params, &Patch::Merge(json!({ "spec": { "replicas": count } })))
                .await
                .with_context(|| format!("scaling deployment {ns}/{name}"))?;
        }
        Ok(())
    }

    async fn edit_config_map_data(&self, ns: &str, name: &str, data: Map) -> Result<()> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), ns);
        api.patch(name, &PatchParams::default(), &Patch::Merge(json!({ "data": data })))
            .await
            .with_context(|| format!("editing configmap {ns}/{name}"))?;
        Ok(())
    }

    async fn remove_config_map_annotation(&self, ns: &str, name: &str, key: &str) -> Result<()> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), ns);
        let patch = Patch::Merge(json!({ "metadata": { "annotations": { key: null } } }));
        api.patch(name, &PatchParams::default(), &patch)
            .await
            .with_context(|| format!("removing annotation {key} from configmap {ns}/{name}"))?;
        Ok(())
    }

    async fn cim_config_map_exists(
        &self,
        ns: &str,
        microservice: &str,
        version: &str,
    ) -> Result<bool> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), ns);
        for name in cim_config_map_names(microservice, version) {
            if api.get_opt(&name).await?.is_some() {
                debug!(namespace = %ns, configmap = %name, "CIM configmap exists");
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_config_map(&self, ns: &str, name: &str) -> Result<Option<ConfigMapSnapshot>> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), ns);
        let cm = api
            .get_opt(name)
            .await
            .with_context(|| format!("fetching configmap {ns}/{name}"))?;
        Ok(cm.as_ref().map(snapshot))
    }

    async fn list_config_maps(&self, ns: &str) -> Result<Vec<ConfigMapSnapshot>> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), ns);
        let cms = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("listing configmaps in {ns}"))?;
        Ok(cms.items.iter().map(snapshot).collect())
    }
}
