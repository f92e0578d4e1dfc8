//! Kubernetes cluster state: Deployments are workloads, their Pods are
//! instances.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use tracing::{debug, info};

use quiesce_core::{Instance, MatchExpression, NodeSelectorTerm, ProviderError, Workload};
use quiesce_engine::ClusterState;

use crate::InitError;

/// Page size for Deployment listings.
const LIST_PAGE: u32 = 500;

pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig (optionally pinned to a
    /// context), the default kubeconfig with a context, or whatever the
    /// environment provides (in-cluster service account first).
    pub async fn connect(
        kubeconfig: Option<&str>,
        context: Option<&str>,
    ) -> Result<Self, InitError> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..KubeConfigOptions::default()
        };

        let config = match (kubeconfig, context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| InitError::Kubeconfig {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| InitError::ClusterConfig(e.to_string()))?
            }
            (None, Some(_)) => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| InitError::ClusterConfig(e.to_string()))?,
            (None, None) => Config::infer()
                .await
                .map_err(|e| InitError::ClusterConfig(e.to_string()))?,
        };

        info!(cluster_url = %config.cluster_url, "connecting to cluster");
        let client = Client::try_from(config).map_err(InitError::ClusterClient)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterState for KubeCluster {
    async fn list_workloads(&self) -> Result<Vec<Workload>, ProviderError> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let mut workloads = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut params = ListParams::default().limit(LIST_PAGE);
            if let Some(token) = &token {
                params = params.continue_token(token);
            }
            let page = api.list(&params).await.map_err(provider_error)?;
            workloads.extend(page.items.iter().filter_map(workload_from_deployment));

            token = page.metadata.continue_.filter(|t| !t.is_empty());
            if token.is_none() {
                break;
            }
        }

        debug!(workloads = workloads.len(), "listed deployments");
        Ok(workloads)
    }

    async fn list_instances(&self, workload: &Workload) -> Result<Vec<Instance>, ProviderError> {
        // An empty selector would match every pod in the namespace.
        if workload.selector.is_empty() && workload.selector_expressions.is_empty() {
            debug!(workload = %workload.key(), "deployment has no selector");
            return Ok(Vec::new());
        }

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let selector = label_selector(&workload.selector, &workload.selector_expressions);
        let params = ListParams::default().labels(&selector);
        let pods = api.list(&params).await.map_err(provider_error)?;

        Ok(pods
            .items
            .iter()
            .filter_map(|pod| pod.metadata.name.as_deref())
            .map(|name| Instance::new(workload.namespace.clone(), name))
            .collect())
    }

    async fn update_desired_replicas(
        &self,
        workload: &Workload,
        replicas: i32,
    ) -> Result<Workload, ProviderError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &workload.namespace);
        let patch = json!({ "spec": { "replicas": replicas } });
        let updated = api
            .patch(&workload.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(provider_error)?;

        workload_from_deployment(&updated).ok_or_else(|| {
            ProviderError::Decode(format!("updated deployment {} is incomplete", workload.key()))
        })
    }
}

/// Project a Deployment onto the fields the engine reads. Returns `None`
/// for objects without a name or namespace.
pub fn workload_from_deployment(deployment: &Deployment) -> Option<Workload> {
    let meta = &deployment.metadata;
    let namespace = meta.namespace.clone()?;
    let name = meta.name.clone()?;
    let spec = deployment.spec.as_ref();

    let node_affinity = spec
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.affinity.as_ref())
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|n| n.required_during_scheduling_ignored_during_execution.as_ref())
        .map(|selector| {
            selector
                .node_selector_terms
                .iter()
                .map(|term| NodeSelectorTerm {
                    match_expressions: term
                        .match_expressions
                        .iter()
                        .flatten()
                        .map(|req| MatchExpression {
                            key: req.key.clone(),
                            operator: req.operator.clone(),
                            values: req.values.clone().unwrap_or_default(),
                        })
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Workload {
        namespace,
        name,
        // The API server defaults an unset replica count to 1.
        replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
        selector: spec
            .and_then(|s| s.selector.match_labels.clone())
            .unwrap_or_default(),
        selector_expressions: spec
            .and_then(|s| s.selector.match_expressions.as_ref())
            .into_iter()
            .flatten()
            .map(|req| MatchExpression {
                key: req.key.clone(),
                operator: req.operator.clone(),
                values: req.values.clone().unwrap_or_default(),
            })
            .collect(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        node_affinity,
        observed_replicas: deployment
            .status
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(0),
    })
}

/// `app=web,tier in (front,edge),!canary`
pub fn label_selector(
    labels: &BTreeMap<String, String>,
    expressions: &[MatchExpression],
) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .chain(expressions.iter().map(selector_requirement))
        .collect::<Vec<_>>()
        .join(",")
}

fn selector_requirement(req: &MatchExpression) -> String {
    let key = &req.key;
    match req.operator.as_str() {
        "In" => format!("{key} in ({})", req.values.join(",")),
        "NotIn" => format!("{key} notin ({})", req.values.join(",")),
        "DoesNotExist" => format!("!{key}"),
        // Exists
        _ => key.clone(),
    }
}

fn provider_error(err: kube::Error) -> ProviderError {
    match err {
        kube::Error::Api(resp) => ProviderError::Api(format!("{} ({})", resp.message, resp.code)),
        other => ProviderError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(value: serde_json::Value) -> Deployment {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn projects_deployment_fields() {
        let d = deployment(json!({
            "metadata": {
                "name": "api",
                "namespace": "shop",
                "annotations": { "quiesce.io/ignore": "true" }
            },
            "spec": {
                "replicas": 3,
                "selector": { "matchLabels": { "app": "api" } },
                "template": {
                    "spec": {
                        "containers": [{ "name": "api", "image": "api:1" }],
                        "affinity": {
                            "nodeAffinity": {
                                "requiredDuringSchedulingIgnoredDuringExecution": {
                                    "nodeSelectorTerms": [{
                                        "matchExpressions": [{
                                            "key": "pool",
                                            "operator": "In",
                                            "values": ["staging"]
                                        }]
                                    }]
                                }
                            }
                        }
                    }
                }
            },
            "status": { "replicas": 2 }
        }));

        let w = workload_from_deployment(&d).unwrap();
        assert_eq!(w.key(), "shop/api");
        assert_eq!(w.replicas, 3);
        assert_eq!(w.observed_replicas, 2);
        assert_eq!(w.selector.get("app").map(String::as_str), Some("api"));
        assert_eq!(
            w.annotations.get("quiesce.io/ignore").map(String::as_str),
            Some("true")
        );
        assert_eq!(w.node_affinity.len(), 1);
        assert_eq!(w.node_affinity[0].match_expressions[0].values, vec!["staging"]);
    }

    #[test]
    fn unset_replicas_default_to_one() {
        let d = deployment(json!({
            "metadata": { "name": "api", "namespace": "shop" },
            "spec": {
                "selector": {},
                "template": {}
            }
        }));

        let w = workload_from_deployment(&d).unwrap();
        assert_eq!(w.replicas, 1);
        assert!(w.selector.is_empty());
        assert!(w.node_affinity.is_empty());
    }

    #[test]
    fn nameless_deployment_is_skipped() {
        let d = deployment(json!({ "metadata": { "namespace": "shop" } }));
        assert!(workload_from_deployment(&d).is_none());
    }

    #[test]
    fn selector_is_comma_joined() {
        let labels = BTreeMap::from([
            ("app".to_string(), "web".to_string()),
            ("tier".to_string(), "front".to_string()),
        ]);
        assert_eq!(label_selector(&labels, &[]), "app=web,tier=front");
    }

    #[test]
    fn match_expressions_join_the_selector() {
        let d = deployment(json!({
            "metadata": { "name": "api", "namespace": "shop" },
            "spec": {
                "selector": {
                    "matchLabels": { "app": "api" },
                    "matchExpressions": [
                        { "key": "tier", "operator": "In", "values": ["front", "edge"] },
                        { "key": "track", "operator": "NotIn", "values": ["canary"] },
                        { "key": "release", "operator": "Exists" },
                        { "key": "legacy", "operator": "DoesNotExist" }
                    ]
                },
                "template": {}
            }
        }));

        let w = workload_from_deployment(&d).unwrap();
        assert_eq!(w.selector_expressions.len(), 4);
        assert_eq!(
            label_selector(&w.selector, &w.selector_expressions),
            "app=api,tier in (front,edge),track notin (canary),release,!legacy"
        );
    }

    #[test]
    fn expression_only_selector_is_kept() {
        let d = deployment(json!({
            "metadata": { "name": "api", "namespace": "shop" },
            "spec": {
                "selector": {
                    "matchExpressions": [{ "key": "app", "operator": "In", "values": ["api"] }]
                },
                "template": {}
            }
        }));

        let w = workload_from_deployment(&d).unwrap();
        assert!(w.selector.is_empty());
        assert_eq!(label_selector(&w.selector, &w.selector_expressions), "app in (api)");
    }
}
