//! Kubernetes API client.
//!
//! Workers are pods labelled with `job_id`. Capacity is the sum of
//! `status.allocatable` over schedulable nodes.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use jobvisor_reconcile::{Capacity, Job, JobId, WorkerPhase, WorkerProcess};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::quantity::{format_cpu, parse_count, parse_cpu, parse_memory};
use super::{ClusterError, ClusterProvider};

/// Label carrying the job id on worker pods.
pub const JOB_ID_LABEL: &str = "job_id";

/// Label carrying the job category on worker pods.
pub const JOB_CATEGORY_LABEL: &str = "job_category";

/// Kubernetes connection settings.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// API server base URL.
    pub api_url: String,

    /// Namespace worker pods live in.
    pub namespace: String,

    /// Bearer token file. Skipped when unset or missing.
    pub token_path: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Container image workers run.
    pub worker_image: String,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            namespace: "default".to_string(),
            token_path: Some("/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()),
            timeout: Duration::from_secs(30),
            worker_image: "jobvisor/worker:latest".to_string(),
        }
    }
}

/// Cluster provider backed by the Kubernetes API.
pub struct KubeCluster {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    token: Option<String>,
    worker_image: String,
}

impl KubeCluster {
    /// Create a new client. Reads the bearer token once, if one is configured.
    pub fn new(config: &KubeConfig) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        let token = match &config.token_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(token) => Some(token.trim().to_string()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path, "API token not found, continuing unauthenticated");
                    None
                }
                Err(source) => {
                    return Err(ClusterError::Token {
                        path: path.clone(),
                        source,
                    })
                }
            },
            None => None,
        };

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            token,
            worker_image: config.worker_image.clone(),
        })
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, self.namespace)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Build the pod manifest for a job's worker.
    fn pod_manifest(&self, job: &Job) -> serde_json::Value {
        let resources = &job.resources;
        let mut limits = serde_json::Map::new();
        limits.insert("cpu".into(), format_cpu(resources.limit_cpu).into());
        limits.insert(
            "memory".into(),
            resources.limit_memory_bytes().to_string().into(),
        );

        let mut requests = serde_json::Map::new();
        if let Some(cpu) = resources.request_cpu {
            requests.insert("cpu".into(), format_cpu(cpu).into());
        }
        if let Some(memory) = resources.request_memory_bytes() {
            requests.insert("memory".into(), memory.to_string().into());
        }

        serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "generateName": format!("{}-", job.worker_name()),
                "labels": {
                    JOB_ID_LABEL: job.id.to_string(),
                    JOB_CATEGORY_LABEL: job.category().as_str(),
                },
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "worker",
                    "image": self.worker_image,
                    "env": [
                        { "name": "JOB_ID", "value": job.id.to_string() },
                        { "name": "JOB_CATEGORY", "value": job.category().as_str() },
                    ],
                    "resources": {
                        "limits": limits,
                        "requests": requests,
                    },
                }],
            },
        })
    }
}

async fn api_error(response: reqwest::Response, what: &str) -> ClusterError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "Failed to {what}");
    ClusterError::Api {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl ClusterProvider for KubeCluster {
    async fn total_capacity(&self) -> Result<Capacity, ClusterError> {
        let url = format!("{}/api/v1/nodes", self.base_url);
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response, "list nodes").await);
        }

        let nodes: NodeList = response.json().await?;
        let mut capacity = Capacity::default();
        for node in &nodes.items {
            if node.spec.unschedulable {
                continue;
            }
            match node.allocatable() {
                Ok(node_capacity) => {
                    capacity.cpu += node_capacity.cpu;
                    capacity.memory_bytes =
                        capacity.memory_bytes.saturating_add(node_capacity.memory_bytes);
                    capacity.slots = capacity.slots.saturating_add(node_capacity.slots);
                }
                Err(e) => {
                    warn!(node = %node.metadata.name, error = %e, "Skipping node with unreadable allocatable");
                }
            }
        }

        debug!(
            nodes = nodes.items.len(),
            cpu = capacity.cpu,
            memory_bytes = capacity.memory_bytes,
            slots = capacity.slots,
            "Fetched cluster capacity"
        );
        Ok(capacity)
    }

    async fn list_workers(&self, phases: &[WorkerPhase]) -> Result<Vec<WorkerProcess>, ClusterError> {
        let url = self.pods_url();
        let mut workers = Vec::new();

        // One query per phase; the lists may drift between calls.
        for phase in phases {
            let field_selector = format!("status.phase={}", phase.as_str());
            let response = self
                .request(reqwest::Method::GET, &url)
                .query(&[("labelSelector", JOB_ID_LABEL), ("fieldSelector", field_selector.as_str())])
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(api_error(response, "list pods").await);
            }

            let pods: PodList = response.json().await?;
            for pod in pods.items {
                let job_id = pod
                    .metadata
                    .labels
                    .get(JOB_ID_LABEL)
                    .and_then(|raw| match raw.parse::<JobId>() {
                        Ok(id) => Some(id),
                        Err(e) => {
                            warn!(pod = %pod.metadata.name, error = %e, "Ignoring pod with malformed job label");
                            None
                        }
                    });
                let phase = pod
                    .status
                    .phase
                    .as_deref()
                    .map(WorkerPhase::parse)
                    .unwrap_or(WorkerPhase::Unknown);

                workers.push(WorkerProcess::new(pod.metadata.name, job_id, phase));
            }
        }

        debug!(count = workers.len(), "Listed worker pods");
        Ok(workers)
    }

    async fn terminate(&self, worker_name: &str) -> Result<(), ClusterError> {
        let url = format!("{}/{}", self.pods_url(), worker_name);
        debug!(worker = %worker_name, "Deleting worker pod");

        let response = self.request(reqwest::Method::DELETE, &url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(worker = %worker_name, "Worker pod already gone");
                Ok(())
            }
            _ => Err(api_error(response, "delete pod").await),
        }
    }

    async fn start(&self, job: &Job) -> Result<(), ClusterError> {
        let manifest = self.pod_manifest(job);
        debug!(job_id = %job.id, category = %job.category(), "Creating worker pod");

        let response = self
            .request(reqwest::Method::POST, &self.pods_url())
            .json(&manifest)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response, "create pod").await);
        }
        Ok(())
    }
}

// =============================================================================
// API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    #[serde(default)]
    metadata: NodeMetadata,
    #[serde(default)]
    spec: NodeSpec,
    #[serde(default)]
    status: NodeStatus,
}

impl Node {
    fn allocatable(&self) -> Result<Capacity, ClusterError> {
        let allocatable = &self.status.allocatable;
        let mut capacity = Capacity::default();
        if let Some(cpu) = allocatable.get("cpu") {
            capacity.cpu = parse_cpu(cpu)?;
        }
        if let Some(memory) = allocatable.get("memory") {
            capacity.memory_bytes = parse_memory(memory)?;
        }
        if let Some(pods) = allocatable.get("pods") {
            capacity.slots = parse_count(pods)?;
        }
        Ok(capacity)
    }
}

#[derive(Debug, Default, Deserialize)]
struct NodeMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSpec {
    #[serde(default)]
    unschedulable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    allocatable: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    phase: Option<String>,
}
