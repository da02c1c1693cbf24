use crate::state::RunSummary;
use crate::workload::{KubeObject, WorkloadId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::warn;

// https://github.com/kubernetes-sigs/kustomize/blob/master/cmd/config/docs/api-conventions/functions-spec.md
pub static RESOURCE_LIST_API_VERSION: &str = "config.kubernetes.io/v1";
pub static RESOURCE_LIST_KIND: &str = "ResourceList";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub items: Vec<KubeObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FunctionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub path: String,
}

impl From<&WorkloadId> for ResourceRef {
    fn from(id: &WorkloadId) -> Self {
        Self {
            api_version: id.api_version.clone(),
            kind: id.kind.clone(),
            name: id.name.clone(),
            namespace: id.namespace.clone(),
        }
    }
}

impl ResourceList {
    /// One warning per image left unpinned, followed by the run totals.
    pub fn push_results(&mut self, summary: &RunSummary) {
        for (outcome, error) in summary.failures() {
            self.results.push(FunctionResult {
                message: format!("container {}: {}", outcome.container_name, error),
                severity: Some(Severity::Warning),
                resource_ref: Some(ResourceRef::from(&outcome.workload)),
                field: Some(Field {
                    path: outcome.image_field_path(),
                }),
            });
        }
        self.results.push(FunctionResult {
            message: format!("image digests: {}", summary),
            severity: Some(Severity::Info),
            resource_ref: None,
            field: None,
        });
    }
}

pub fn read_resource_list<R: Read>(reader: R) -> Result<ResourceList> {
    let resource_list: ResourceList =
        serde_yaml_ng::from_reader(reader).context("Failed to parse ResourceList")?;

    if resource_list.kind != RESOURCE_LIST_KIND {
        anyhow::bail!(
            "Expected kind {}, got {}",
            RESOURCE_LIST_KIND,
            resource_list.kind
        );
    }
    if resource_list.api_version != RESOURCE_LIST_API_VERSION {
        warn!(
            "Unexpected ResourceList apiVersion {}, expected {}",
            resource_list.api_version, RESOURCE_LIST_API_VERSION
        );
    }
    Ok(resource_list)
}

pub fn write_resource_list<W: Write>(writer: W, resource_list: &ResourceList) -> Result<()> {
    serde_yaml_ng::to_writer(writer, resource_list).context("Failed to write ResourceList")
}
