use crate::image_reference::ParseError;
use crate::oci_registry::RegistryError;
use crate::workload::WorkloadId;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// New digest-pinned reference that replaces the container image.
    Pinned(String),
    AlreadyPinned,
    NoImage,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unresolved image '{image}': {source}")]
    UnresolvedImage {
        image: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to resolve digest for image '{image}': {source}")]
    ResolutionFailed {
        image: String,
        #[source]
        source: RegistryError,
    },
}

pub struct ContainerOutcome {
    pub(crate) workload: WorkloadId,
    pub(crate) field_path: &'static str,
    pub(crate) index: usize,
    pub(crate) container_name: String,
    pub(crate) result: Result<Resolution, ResolveError>,
}

impl ContainerOutcome {
    /// Field path of the image, e.g. `spec.containers[1].image`.
    pub fn image_field_path(&self) -> String {
        format!("{}[{}].image", self.field_path, self.index)
    }
}

#[derive(Default)]
pub struct RunSummary {
    pub rewritten: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<ContainerOutcome>,
}

impl RunSummary {
    pub fn record(&mut self, outcome: ContainerOutcome) {
        match &outcome.result {
            Ok(Resolution::Pinned(_)) => self.rewritten += 1,
            Ok(Resolution::AlreadyPinned | Resolution::NoImage) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ContainerOutcome, &ResolveError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|e| (outcome, e)))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rewritten={} skipped={} failed={}",
            self.rewritten, self.skipped, self.failed
        )
    }
}
