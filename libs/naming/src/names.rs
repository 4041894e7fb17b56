//! Canonical deployment and service names.

/// Suffix appended to a deployment name to form its service name.
pub const SERVICE_SUFFIX: &str = "-service";

/// Returns the deployment name for an application kind and optional index.
///
/// The kind is lower-cased; the index, when present, is appended after a dash.
#[must_use]
pub fn deployment_name(kind: &str, index: Option<u32>) -> String {
    let base = kind.to_lowercase();
    match index {
        Some(index) => format!("{base}-{index}"),
        None => base,
    }
}

/// Returns the service name fronting the deployment of the same kind/index.
#[must_use]
pub fn service_name(kind: &str, index: Option<u32>) -> String {
    format!("{}{SERVICE_SUFFIX}", deployment_name(kind, index))
}

/// Extracts the positive index from a `{prefix}-{index}` name.
///
/// Returns `None` when the name has a different prefix or the suffix is not a
/// positive integer (`worker-0`, `worker-abc`, `worker-1-service`).
#[must_use]
pub fn parse_indexed_name(prefix: &str, name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(prefix)?.strip_prefix('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match suffix.parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(index) => Some(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_deployment_name_with_index() {
        assert_eq!(deployment_name("Worker", Some(3)), "worker-3");
    }

    #[test]
    fn test_deployment_name_without_index() {
        assert_eq!(deployment_name("Km", None), "km");
    }

    #[test]
    fn test_service_name() {
        assert_eq!(service_name("Worker", Some(3)), "worker-3-service");
        assert_eq!(service_name("CONTRACT", None), "contract-service");
    }

    #[test]
    fn test_parse_indexed_name() {
        assert_eq!(parse_indexed_name("worker", "worker-12"), Some(12));
        assert_eq!(parse_indexed_name("worker", "worker-0"), None);
        assert_eq!(parse_indexed_name("worker", "worker-abc"), None);
        assert_eq!(parse_indexed_name("worker", "worker-1-service"), None);
        assert_eq!(parse_indexed_name("worker", "bootstrap-1"), None);
        assert_eq!(parse_indexed_name("worker", "worker"), None);
    }

    proptest! {
        #[test]
        fn prop_indexed_name_parses_back(kind in "[A-Za-z]{1,12}", index in 1u32..100_000) {
            let name = deployment_name(&kind, Some(index));
            prop_assert_eq!(parse_indexed_name(&kind.to_lowercase(), &name), Some(index));
        }

        #[test]
        fn prop_service_name_extends_deployment_name(kind in "[A-Za-z]{1,12}", index in proptest::option::of(1u32..1000)) {
            let dp = deployment_name(&kind, index);
            let svc = service_name(&kind, index);
            prop_assert_eq!(svc.strip_suffix(SERVICE_SUFFIX), Some(dp.as_str()));
        }
    }
}
