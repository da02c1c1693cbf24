use crate::oci_registry::DigestSource;
use crate::resolver::resolve_pod_spec;
use crate::state::RunSummary;
use crate::workload::KubeObject;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Pins the images of every pod template found in `items`, in place.
///
/// All pod templates are resolved concurrently and the call returns once every
/// lookup has finished. At most `concurrency` registry lookups are in flight at
/// any time. Per-image failures end up in the summary and never abort the run.
pub async fn pin_image_digests<S: DigestSource>(
    items: &mut [KubeObject],
    source: &S,
    concurrency: usize,
) -> RunSummary {
    let permits = Semaphore::new(concurrency.max(1));

    let pod_templates = items.iter_mut().filter_map(|object| {
        let workload = object.workload_id()?;
        let field_path = object.containers_field_path()?;
        match object.pod_spec_mut() {
            Some(spec) => Some((workload, field_path, spec)),
            None => {
                debug!("Skipping {} without a pod template", workload);
                None
            }
        }
    });

    let resolutions = join_all(pod_templates.map(|(workload, field_path, spec)| {
        resolve_pod_spec(spec, workload, field_path, source, &permits)
    }))
    .await;

    for object in items.iter_mut() {
        object.write_back_images();
    }

    let mut summary = RunSummary::default();
    for outcome in resolutions.into_iter().flatten() {
        summary.record(outcome);
    }

    info!("Pinned image digests: {}", summary);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci_registry::stub::StubRegistry;
    use crate::resource_list::{read_resource_list, write_resource_list};
    use crate::state::ResolveError;
    use serde_json::{Value, json};

    fn pod(name: &str, images: &[&str]) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": name},
            "spec": {"containers": containers(images)}
        })
    }

    fn templated(kind: &str, name: &str, images: &[&str]) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": kind,
            "metadata": {"name": name},
            "spec": {
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {"containers": containers(images)}
                }
            }
        })
    }

    fn containers(images: &[&str]) -> Vec<Value> {
        images
            .iter()
            .enumerate()
            .map(|(i, image)| json!({"name": format!("c{}", i), "image": image}))
            .collect()
    }

    fn images(object: &KubeObject) -> Vec<String> {
        object
            .pod_spec()
            .map(|spec| {
                spec.containers
                    .iter()
                    .filter_map(|c| c.image.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_pins_pod_image() {
        let registry = StubRegistry::default().with_digest("example.com/app:v1", "sha256:abc123");
        let mut items = vec![KubeObject::from_value(pod("web", &["example.com/app:v1"]))];

        let summary = pin_image_digests(&mut items, &registry, 4).await;

        assert_eq!(images(&items[0]), vec!["example.com/app@sha256:abc123"]);
        assert_eq!(
            registry.requested_urls(),
            vec!["https://example.com/v2/app/manifests/v1"]
        );
        assert_eq!(summary.to_string(), "rewritten=1 skipped=0 failed=0");
    }

    #[tokio::test]
    async fn test_leaves_pinned_deployment_unchanged() {
        let original = templated("Deployment", "svc", &["reg.io/ns/svc@sha256:deadbeef"]);
        let mut items = vec![KubeObject::from_value(original.clone())];
        let registry = StubRegistry::default();

        let summary = pin_image_digests(&mut items, &registry, 4).await;

        assert_eq!(
            serde_json::to_value(&items[0]).expect("Should serialize"),
            original
        );
        assert!(registry.requested_urls().is_empty());
        assert_eq!(summary.to_string(), "rewritten=0 skipped=1 failed=0");
    }

    #[tokio::test]
    async fn test_mixed_collection_only_touches_workloads() {
        let config_map = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings"},
            "data": {"image": "example.com/app:v1"}
        });
        let registry = StubRegistry::default()
            .with_digest("example.com/app:v1", "sha256:a")
            .with_digest("example.com/api:v2", "sha256:b")
            .with_digest("example.com/db:v3", "sha256:c");
        let mut items = vec![
            KubeObject::from_value(pod("web", &["example.com/app:v1"])),
            KubeObject::from_value(config_map.clone()),
            KubeObject::from_value(templated("Deployment", "api", &["example.com/api:v2"])),
            KubeObject::from_value(templated("StatefulSet", "db", &["example.com/db:v3"])),
        ];

        let summary = pin_image_digests(&mut items, &registry, 4).await;

        assert_eq!(images(&items[0]), vec!["example.com/app@sha256:a"]);
        assert_eq!(
            serde_json::to_string(&items[1]).expect("Should serialize"),
            serde_json::to_string(&config_map).expect("Should serialize")
        );
        assert_eq!(images(&items[2]), vec!["example.com/api@sha256:b"]);
        assert_eq!(images(&items[3]), vec!["example.com/db@sha256:c"]);
        assert_eq!(summary.rewritten, 3);
        assert_eq!(registry.requested_urls().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_in_stateful_set_does_not_block_siblings() {
        let registry = StubRegistry::default()
            .with_digest("example.com/a:v1", "sha256:a")
            .with_digest("example.com/c:v1", "sha256:c");
        let mut items = vec![KubeObject::from_value(templated(
            "StatefulSet",
            "db",
            &["example.com/a:v1", "example.com/b:v1", "example.com/c:v1"],
        ))];

        let summary = pin_image_digests(&mut items, &registry, 4).await;

        assert_eq!(
            images(&items[0]),
            vec![
                "example.com/a@sha256:a",
                "example.com/b:v1",
                "example.com/c@sha256:c",
            ]
        );
        assert_eq!(summary.to_string(), "rewritten=2 skipped=0 failed=1");
        let (failed, error) = summary.failures().next().expect("Should report failure");
        assert_eq!(failed.image_field_path(), "spec.template.spec.containers[1].image");
        assert_eq!(failed.workload.to_string(), "StatefulSet db");
        assert!(matches!(error, ResolveError::ResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_skips_workload_without_pod_template() {
        let registry = StubRegistry::default().with_digest("example.com/app:v1", "sha256:a");
        let mut items = vec![
            KubeObject::from_value(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "empty"}
            })),
            KubeObject::from_value(pod("web", &["example.com/app:v1"])),
        ];

        let summary = pin_image_digests(&mut items, &registry, 4).await;

        assert!(items[0].pod_spec().is_none());
        assert_eq!(images(&items[1]), vec!["example.com/app@sha256:a"]);
        assert_eq!(summary.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_bounds_lookups_across_pod_templates() {
        let mut registry = StubRegistry::default();
        let mut items = Vec::new();
        for i in 0..5 {
            let image = format!("example.com/app{}:v1", i);
            registry = registry.with_digest(&image, "sha256:1").with_delay(&image, 20);
            items.push(KubeObject::from_value(pod(&format!("p{}", i), &[image.as_str()])));
        }

        let summary = pin_image_digests(&mut items, &registry, 2).await;

        assert_eq!(summary.rewritten, 5);
        assert!(
            registry
                .max_in_flight
                .load(std::sync::atomic::Ordering::SeqCst)
                <= 2
        );
    }

    #[tokio::test]
    async fn test_resource_list_round_trip_keeps_unknown_fields() {
        let input = r#"
apiVersion: config.kubernetes.io/v1
kind: ResourceList
items:
  - apiVersion: v1
    kind: Pod
    metadata:
      name: web
    spec:
      futureField: keepme
      containers:
        - name: app
          image: example.com/app:v1
          x-vendor: true
  - apiVersion: apps/v1
    kind: StatefulSet
    metadata:
      name: db
    spec:
      selector:
        matchLabels:
          app: db
      template:
        metadata:
          labels:
            app: db
        spec:
          containers:
            - name: db
              image: example.com/db:v3
"#;
        let registry = StubRegistry::default()
            .with_digest("example.com/app:v1", "sha256:a")
            .with_digest("example.com/db:v3", "sha256:c");
        let mut resource_list = read_resource_list(input.as_bytes()).expect("Should parse");

        let summary = pin_image_digests(&mut resource_list.items, &registry, 4).await;
        let mut output = Vec::new();
        write_resource_list(&mut output, &resource_list).expect("Should write");
        let output = read_resource_list(output.as_slice()).expect("Should parse output");

        let pod = serde_json::to_value(&output.items[0]).expect("Should serialize");
        assert_eq!(
            pod["spec"],
            json!({
                "futureField": "keepme",
                "containers": [
                    {"name": "app", "image": "example.com/app@sha256:a", "x-vendor": true}
                ]
            })
        );
        let container_keys: Vec<_> = pod["spec"]["containers"][0]
            .as_object()
            .expect("Container is an object")
            .keys()
            .cloned()
            .collect();
        assert_eq!(container_keys, vec!["name", "image", "x-vendor"]);
        assert_eq!(images(&output.items[1]), vec!["example.com/db@sha256:c"]);
        assert_eq!(summary.to_string(), "rewritten=2 skipped=0 failed=0");
    }
}
