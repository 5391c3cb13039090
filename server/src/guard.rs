//! Working-directory admission against the configured allow-list.
//!
//! A requested path is admissible iff the allow-list is empty, the path
//! equals an entry exactly, or the path sits below an entry. Relative paths
//! and paths containing `..` segments are always rejected — callers are
//! expected to hand in canonicalized absolute paths, and the component check
//! is the backstop for the ones that slip through.

use std::path::{Component, Path};

/// Decide whether `path` falls within the allow-list.
pub fn is_path_allowed(path: &str, allowed_dirs: &[String]) -> bool {
    let p = Path::new(path);
    if !p.is_absolute() {
        return false;
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return false;
    }
    if allowed_dirs.is_empty() {
        return true;
    }
    allowed_dirs.iter().any(|root| {
        let root = root.trim_end_matches('/');
        // An empty root after trimming means "/" was configured, which admits
        // every absolute path.
        root.is_empty() || path == root || path.starts_with(&format!("{root}/"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_allowlist_admits_any_absolute_path() {
        assert!(is_path_allowed("/etc", &[]));
        assert!(is_path_allowed("/", &[]));
    }

    #[test]
    fn exact_match_admitted() {
        assert!(is_path_allowed("/srv/a", &dirs(&["/srv/a"])));
    }

    #[test]
    fn child_path_admitted() {
        assert!(is_path_allowed("/srv/a/project", &dirs(&["/srv/a"])));
    }

    #[test]
    fn sibling_prefix_rejected() {
        // "/srv/ab" shares a string prefix with "/srv/a" but is not below it.
        assert!(!is_path_allowed("/srv/ab", &dirs(&["/srv/a"])));
    }

    #[test]
    fn outside_allowlist_rejected() {
        assert!(!is_path_allowed("/etc", &dirs(&["/srv/a"])));
    }

    #[test]
    fn relative_path_rejected() {
        assert!(!is_path_allowed("srv/a", &dirs(&["/srv/a"])));
        assert!(!is_path_allowed("srv/a", &[]));
    }

    #[test]
    fn parent_traversal_rejected() {
        assert!(!is_path_allowed("/srv/a/../../etc", &dirs(&["/srv/a"])));
        assert!(!is_path_allowed("/srv/a/..", &[]));
    }

    #[test]
    fn trailing_slash_on_entry_ignored() {
        assert!(is_path_allowed("/srv/a/project", &dirs(&["/srv/a/"])));
    }

    #[test]
    fn root_entry_admits_everything() {
        assert!(is_path_allowed("/etc", &dirs(&["/"])));
    }
}
