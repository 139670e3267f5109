//! Logical path helpers.
//!
//! Logical paths look like `"{composite device name}/{storage}/{dir}/.../{name}"`. Both `/`
//! and `\` are accepted on input; `/` is the only separator ever produced.

pub const SEPARATOR: char = '/';

/// Splits a logical path into its non-empty segments, treating `\` like `/`.
pub fn segments(path: &str) -> Vec<String> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rewrites every separator to `/` and drops empty segments.
pub fn normalize(path: &str) -> String {
    segments(path).join("/")
}

/// Full path of a child: the parent path, one separator, the child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{SEPARATOR}{name}")
    }
}

/// Removes a leading segment equal to `prefix`. Returns whether it was removed.
pub(crate) fn strip_leading(segments: &mut Vec<String>, prefix: &str) -> bool {
    if segments.first().is_some_and(|first| first == prefix) {
        segments.remove(0);
        true
    } else {
        false
    }
}
