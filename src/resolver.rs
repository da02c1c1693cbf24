use crate::image_reference::{ImageReference, is_digest_pinned};
use crate::oci_registry::DigestSource;
use crate::state::{ContainerOutcome, Resolution, ResolveError};
use crate::workload::WorkloadId;
use futures::future::join_all;
use k8s_openapi::api::core::v1::PodSpec;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub async fn resolve_image<S: DigestSource>(
    image: Option<&str>,
    source: &S,
    permits: &Semaphore,
) -> Result<Resolution, ResolveError> {
    let Some(image) = image else {
        return Ok(Resolution::NoImage);
    };
    if is_digest_pinned(image) {
        return Ok(Resolution::AlreadyPinned);
    }

    let image_reference =
        ImageReference::parse(image).map_err(|source| ResolveError::UnresolvedImage {
            image: image.to_string(),
            source,
        })?;

    let _permit = permits.acquire().await;
    let digest = source
        .fetch_digest(&image_reference)
        .await
        .map_err(|source| ResolveError::ResolutionFailed {
            image: image.to_string(),
            source,
        })?;

    Ok(Resolution::Pinned(image_reference.pinned(&digest)))
}

/// Resolves every container of one pod template concurrently, then writes the
/// pinned references back by position. Failed or skipped containers keep
/// their original image.
pub async fn resolve_pod_spec<S: DigestSource>(
    spec: &mut PodSpec,
    workload: WorkloadId,
    field_path: &'static str,
    source: &S,
    permits: &Semaphore,
) -> Vec<ContainerOutcome> {
    let results = join_all(
        spec.containers
            .iter()
            .map(|container| resolve_image(container.image.as_deref(), source, permits)),
    )
    .await;

    spec.containers
        .iter_mut()
        .zip(results)
        .enumerate()
        .map(|(index, (container, result))| {
            match &result {
                Ok(Resolution::Pinned(image)) => {
                    info!(
                        "Pinning container {} of {} to {}",
                        container.name, workload, image
                    );
                    container.image = Some(image.clone());
                }
                Ok(resolution) => debug!(
                    "Skipping container {} of {}: {:?}",
                    container.name, workload, resolution
                ),
                Err(e) => warn!(
                    "Leaving container {} of {} unchanged: {}",
                    container.name, workload, e
                ),
            }

            ContainerOutcome {
                workload: workload.clone(),
                field_path,
                index,
                container_name: container.name.clone(),
                result,
            }
        })
        .collect()
}
