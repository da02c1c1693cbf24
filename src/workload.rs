use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{Metadata, Resource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// A resource kind that carries a pod template, directly or nested.
pub trait Workload
where
    Self: Resource + Metadata<Ty = ObjectMeta> + Serialize + DeserializeOwned,
{
    fn kind_name() -> &'static str {
        Self::KIND
    }

    /// Path of the container list, as reported in function results.
    fn containers_field_path() -> &'static str;
    /// The same path as a JSON pointer.
    fn containers_pointer() -> &'static str;

    fn pod_spec(&self) -> Option<&PodSpec>;
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec>;

    fn matches(api_version: &str, kind: &str) -> bool {
        api_version == Self::API_VERSION && kind == Self::KIND
    }

    fn workload_id(&self) -> WorkloadId {
        let metadata = self.metadata();
        WorkloadId {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::kind_name().to_string(),
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone(),
        }
    }
}

impl Workload for Pod {
    fn containers_field_path() -> &'static str {
        "spec.containers"
    }

    fn containers_pointer() -> &'static str {
        "/spec/containers"
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref()
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut()
    }
}

impl Workload for Deployment {
    fn containers_field_path() -> &'static str {
        "spec.template.spec.containers"
    }

    fn containers_pointer() -> &'static str {
        "/spec/template/spec/containers"
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

impl Workload for StatefulSet {
    fn containers_field_path() -> &'static str {
        "spec.template.spec.containers"
    }

    fn containers_pointer() -> &'static str {
        "/spec/template/spec/containers"
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadId {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} {}/{}", self.kind, namespace, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A workload parsed into its typed schema, alongside the document it was
/// read from. The document is what gets written out, so fields unknown to the
/// typed schema survive.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed<W> {
    pub workload: W,
    raw: Value,
}

impl<W: Workload> Typed<W> {
    /// Copies the container images of the typed view into the document.
    fn write_back_images(&mut self) {
        let Some(spec) = self.workload.pod_spec() else {
            return;
        };
        let Some(containers) = self
            .raw
            .pointer_mut(W::containers_pointer())
            .and_then(Value::as_array_mut)
        else {
            return;
        };

        for (container, raw_container) in spec.containers.iter().zip(containers.iter_mut()) {
            let (Some(image), Some(raw_container)) = (&container.image, raw_container.as_object_mut())
            else {
                continue;
            };
            if raw_container.get("image").and_then(Value::as_str) != Some(image.as_str()) {
                raw_container.insert("image".to_string(), Value::String(image.clone()));
            }
        }
    }
}

/// One item of a resource collection. Kinds without a pod template are kept
/// as raw JSON so they are written back exactly as they were read.
#[derive(Debug, Clone, PartialEq)]
pub enum KubeObject {
    Pod(Typed<Pod>),
    Deployment(Typed<Deployment>),
    StatefulSet(Typed<StatefulSet>),
    Other(Value),
}

fn parse_workload<W: Workload>(value: Value, wrap: fn(Typed<W>) -> KubeObject) -> KubeObject {
    match serde_json::from_value::<W>(value.clone()) {
        Ok(workload) => wrap(Typed {
            workload,
            raw: value,
        }),
        Err(e) => {
            warn!(
                "Leaving {} untouched, it does not match the typed schema: {}",
                W::kind_name(),
                e
            );
            KubeObject::Other(value)
        }
    }
}

impl KubeObject {
    pub fn from_value(value: Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let (api_version, kind) = (field("apiVersion"), field("kind"));

        if Pod::matches(&api_version, &kind) {
            parse_workload(value, KubeObject::Pod)
        } else if Deployment::matches(&api_version, &kind) {
            parse_workload(value, KubeObject::Deployment)
        } else if StatefulSet::matches(&api_version, &kind) {
            parse_workload(value, KubeObject::StatefulSet)
        } else {
            KubeObject::Other(value)
        }
    }

    pub fn workload_id(&self) -> Option<WorkloadId> {
        match self {
            KubeObject::Pod(pod) => Some(pod.workload.workload_id()),
            KubeObject::Deployment(deployment) => Some(deployment.workload.workload_id()),
            KubeObject::StatefulSet(stateful_set) => Some(stateful_set.workload.workload_id()),
            KubeObject::Other(_) => None,
        }
    }

    pub fn containers_field_path(&self) -> Option<&'static str> {
        match self {
            KubeObject::Pod(_) => Some(Pod::containers_field_path()),
            KubeObject::Deployment(_) => Some(Deployment::containers_field_path()),
            KubeObject::StatefulSet(_) => Some(StatefulSet::containers_field_path()),
            KubeObject::Other(_) => None,
        }
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            KubeObject::Pod(pod) => pod.workload.pod_spec(),
            KubeObject::Deployment(deployment) => deployment.workload.pod_spec(),
            KubeObject::StatefulSet(stateful_set) => stateful_set.workload.pod_spec(),
            KubeObject::Other(_) => None,
        }
    }

    /// `None` for kinds without a pod template, and for supported kinds whose
    /// template is absent. Both are skipped, never treated as errors.
    ///
    /// Changes made through the returned spec only reach the serialized output
    /// after [`KubeObject::write_back_images`].
    pub fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        match self {
            KubeObject::Pod(pod) => pod.workload.pod_spec_mut(),
            KubeObject::Deployment(deployment) => deployment.workload.pod_spec_mut(),
            KubeObject::StatefulSet(stateful_set) => stateful_set.workload.pod_spec_mut(),
            KubeObject::Other(_) => None,
        }
    }

    /// Patches container images into the document, leaving every other field as read.
    pub fn write_back_images(&mut self) {
        match self {
            KubeObject::Pod(pod) => pod.write_back_images(),
            KubeObject::Deployment(deployment) => deployment.write_back_images(),
            KubeObject::StatefulSet(stateful_set) => stateful_set.write_back_images(),
            KubeObject::Other(_) => {}
        }
    }
}

impl<'de> Deserialize<'de> for KubeObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(KubeObject::from_value)
    }
}

impl Serialize for KubeObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            KubeObject::Pod(pod) => pod.raw.serialize(serializer),
            KubeObject::Deployment(deployment) => deployment.raw.serialize(serializer),
            KubeObject::StatefulSet(stateful_set) => stateful_set.raw.serialize(serializer),
            KubeObject::Other(value) => value.serialize(serializer),
        }
    }
}
