use crate::config::{LogSource, SourceConfig};
use crate::container::Container;

/// Returns whether `container` matches the filters of a docker source.
///
/// - With an image, the container image must be exactly equal.
/// - With labels, a comma separated list such as `foo:bar, baz`, at least one
///   entry must match: either an existing label key, or a `key:value` /
///   `key=value` pair present on the container.
/// - Without filters every container matches.
///
/// File sources never match.
pub fn source_should_monitor_container(source: &LogSource, container: &Container) -> bool {
    let SourceConfig::Docker { image, label } = source.config() else {
        return false;
    };
    if let Some(image) = image.as_deref().filter(|image| !image.is_empty()) {
        if container.image != image {
            return false;
        }
    }
    if let Some(label) = label.as_deref().filter(|label| !label.is_empty()) {
        return label.split(',').any(|entry| label_matches(entry.trim(), container));
    }

    true
}

fn label_matches(label: &str, container: &Container) -> bool {
    if container.labels.contains_key(label) {
        return true;
    }
    let parts: Vec<&str> = label
        .split([':', '='])
        .filter(|part| !part.is_empty())
        .collect();
    match parts.as_slice() {
        [key, value] => container.labels.get(*key).is_some_and(|v| v == value),
        _ => false,
    }
}
