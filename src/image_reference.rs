use std::fmt;

static DEFAULT_TAG: &str = "latest";
static DIGEST_MARKER: char = '@';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("digest references are not allowed")]
    DigestNotAllowed,
    #[error("registry is missing")]
    MissingRegistry,
    #[error("repository is missing")]
    MissingRepository,
    #[error("invalid image format: {0}")]
    InvalidFormat(String),
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// Whether the reference already names an image by content digest, e.g. `app@sha256:...`.
pub fn is_digest_pinned(image: &str) -> bool {
    image.contains(DIGEST_MARKER)
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if is_digest_pinned(s) {
            return Err(ParseError::DigestNotAllowed);
        }

        // The tag separator is the last colon after the last slash, a colon
        // before it belongs to a registry port (localhost:5000/app)
        let (without_tag, tag) = match s.rfind(':') {
            Some(pos) if s.rfind('/').is_none_or(|slash| pos > slash) => {
                (&s[..pos], &s[pos + 1..])
            }
            _ => (s, ""),
        };
        let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };

        if without_tag.is_empty() {
            return Err(ParseError::MissingRepository);
        }

        // Split into registry and repository by the first slash
        let Some((registry, repository)) = without_tag.split_once('/') else {
            return Err(ParseError::InvalidFormat(s.to_string()));
        };

        if registry.is_empty() {
            return Err(ParseError::MissingRegistry);
        }
        if repository.is_empty() {
            return Err(ParseError::MissingRepository);
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// The reference without its tag, `registry/repository`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    pub fn pinned(&self, digest: &str) -> String {
        format!("{}{}{}", self.name(), DIGEST_MARKER, digest)
    }

    // https://distribution.github.io/distribution/spec/api/#pulling-an-image-manifest
    pub fn manifest_url(&self, scheme: &str) -> String {
        format!(
            "{}://{}/v2/{}/manifests/{}",
            scheme, self.registry, self.repository, self.tag
        )
    }
}
