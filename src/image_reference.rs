use std::fmt;

/// A container image reference as accepted by the kubelet.
///
/// The registry is optional (`nginx:1.25` resolves against the default registry)
/// and so is the pin (an untagged image means `:latest`).
#[derive(Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub pin: ImagePin,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ImagePin {
    Tag(String),
    Digest(String),
}

#[derive(Debug)]
pub enum ParseError {
    Empty,
    MissingRepository,
    InvalidFormat(String),
    InvalidDigest(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingRepository => write!(f, "repository is missing"),
            ParseError::InvalidFormat(image) => write!(f, "invalid image format: {}", image),
            ParseError::InvalidDigest(digest) => write!(f, "invalid digest: {}", digest),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        match &self.pin {
            ImagePin::Tag(tag) => write!(f, "{}:{}", self.repository, tag),
            ImagePin::Digest(digest) => write!(f, "{}@{}", self.repository, digest),
        }
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let (name, pin) = match s.split_once('@') {
            Some((name, digest)) => (name, ImagePin::Digest(parse_digest(digest)?)),
            None => match s.rfind(':') {
                // A colon before the last slash belongs to a registry port
                Some(pos) if pos > s.rfind('/').unwrap_or(0) => {
                    let tag = &s[pos + 1..];
                    if tag.is_empty() {
                        return Err(ParseError::InvalidFormat(s.to_string()));
                    }
                    (&s[..pos], ImagePin::Tag(tag.to_string()))
                }
                _ => (s, ImagePin::Tag("latest".to_string())),
            },
        };

        // The first component is a registry only if it looks like a host
        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (Some(host.to_string()), rest),
            _ => (None, name),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(ParseError::MissingRepository);
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            pin,
        })
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn parse_digest(digest: &str) -> Result<String, ParseError> {
    let valid = digest.split_once(':').is_some_and(|(algorithm, hex)| {
        !algorithm.is_empty()
            && !hex.is_empty()
            && hex.chars().all(|c| c.is_ascii_hexdigit())
    });
    if !valid {
        return Err(ParseError::InvalidDigest(digest.to_string()));
    }
    Ok(digest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4b0f3c2e8d1a5f6e7c9b0a1d2e3f405162738495a6b7c8d9e0f1a2b3c4d5e6f7";

    #[test]
    fn test_parse_tagged_image() {
        let image = ImageReference::parse("quay.io/openshift/origin-sriov-dp-admission-controller:4.3")
            .expect("Tagged image should parse");
        assert_eq!(image.registry.as_deref(), Some("quay.io"));
        assert_eq!(image.repository, "openshift/origin-sriov-dp-admission-controller");
        assert_eq!(image.pin, ImagePin::Tag("4.3".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let image = ImageReference::parse("registry.local:5000/sriov/injector:v1")
            .expect("Registry port should not be mistaken for a tag");
        assert_eq!(image.registry.as_deref(), Some("registry.local:5000"));
        assert_eq!(image.repository, "sriov/injector");
        assert_eq!(image.pin, ImagePin::Tag("v1".to_string()));
    }

    #[test]
    fn test_parse_short_name() {
        let image = ImageReference::parse("nginx:1.25").expect("Short name should parse");
        assert_eq!(image.registry, None);
        assert_eq!(image.repository, "nginx");
        assert_eq!(image.pin, ImagePin::Tag("1.25".to_string()));
    }

    #[test]
    fn test_parse_short_name_with_namespace() {
        let image = ImageReference::parse("openshift/injector:v4").expect("Hub path should parse");
        assert_eq!(image.registry, None);
        assert_eq!(image.repository, "openshift/injector");
    }

    #[test]
    fn test_parse_untagged_image_defaults_to_latest() {
        let image = ImageReference::parse("quay.io/openshift/origin-sriov-dp-admission-controller")
            .expect("Untagged image should parse");
        assert_eq!(image.registry.as_deref(), Some("quay.io"));
        assert_eq!(image.pin, ImagePin::Tag("latest".to_string()));

        let image = ImageReference::parse("localhost:5000/injector")
            .expect("Untagged image on a registry port should parse");
        assert_eq!(image.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(image.repository, "injector");
        assert_eq!(image.pin, ImagePin::Tag("latest".to_string()));
    }

    #[test]
    fn test_parse_digest_image() {
        let input = format!("quay.io/openshift-release-dev/ocp-v4.0-art-dev@{}", DIGEST);
        let image = ImageReference::parse(&input).expect("Digest image should parse");
        assert_eq!(image.registry.as_deref(), Some("quay.io"));
        assert_eq!(image.pin, ImagePin::Digest(DIGEST.to_string()));
        assert_eq!(image.to_string(), input);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ImageReference::parse(""), Err(ParseError::Empty)));
        assert!(matches!(
            ImageReference::parse("quay.io/sriov injector:v1"),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            ImageReference::parse("quay.io/sriov/injector:"),
            Err(ParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            ImageReference::parse("quay.io/:v1"),
            Err(ParseError::MissingRepository)
        ));
        assert!(matches!(
            ImageReference::parse("quay.io/sriov/injector@sha256:not-hex"),
            Err(ParseError::InvalidDigest(_))
        ));
    }
}
