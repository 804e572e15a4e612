//! Path-prefix policies deciding which mountpoints a customization may use.

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Policy attached to one path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathPolicy {
    /// Reject the prefix and everything below it.
    pub deny: bool,
    /// Only the prefix itself is allowed, not paths below it.
    pub exact: bool,
}

/// A set of prefix policies. The longest matching prefix decides.
#[derive(Debug, Clone, Default)]
pub struct PathPolicies {
    entries: BTreeMap<String, PathPolicy>,
}

/// Mountpoints a filesystem customization is allowed to create or resize.
pub static MOUNTPOINT_POLICIES: LazyLock<PathPolicies> = LazyLock::new(|| {
    PathPolicies::new([
        ("/", PathPolicy { deny: false, exact: true }),
        ("/boot", PathPolicy { deny: false, exact: true }),
        ("/var", PathPolicy::default()),
        ("/var/run", PathPolicy { deny: true, exact: false }),
        ("/var/lock", PathPolicy { deny: true, exact: false }),
        ("/opt", PathPolicy::default()),
        ("/srv", PathPolicy::default()),
        ("/usr", PathPolicy::default()),
        ("/app", PathPolicy::default()),
        ("/data", PathPolicy::default()),
        ("/home", PathPolicy::default()),
        ("/tmp", PathPolicy::default()),
    ])
});

impl PathPolicies {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, PathPolicy)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, policy)| (path.to_string(), policy))
                .collect(),
        }
    }

    /// Check `path` (already cleaned) against the policies.
    pub fn check(&self, path: &str) -> Result<(), String> {
        let Some((prefix, policy)) = self
            .entries
            .iter()
            .filter(|(prefix, _)| is_path_prefix(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
        else {
            return Err(format!("path '{}' is not allowed", path));
        };

        if policy.deny {
            return Err(format!("path '{}' is not allowed", path));
        }
        if policy.exact && prefix != path {
            return Err(format!(
                "path '{}' is not allowed: only '{}' itself may be used",
                path, prefix
            ));
        }
        Ok(())
    }
}

fn is_path_prefix(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Normalize an absolute path: collapse `//` and `/./`, drop a trailing `/`.
///
/// Relative paths and `..` components are rejected.
pub fn clean_mountpoint(path: &str) -> Result<String, String> {
    if !path.starts_with('/') {
        return Err(format!("mountpoint '{}' must be an absolute path", path));
    }

    let mut parts = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(format!(
                    "mountpoint '{}' must not contain '..' components",
                    path
                ))
            }
            other => parts.push(other),
        }
    }

    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_entries() {
        let policies = &*MOUNTPOINT_POLICIES;
        assert!(policies.check("/").is_ok());
        assert!(policies.check("/boot").is_ok());
        assert!(policies.check("/boot/efi").is_err());
        assert!(policies.check("/etc").is_err());
    }

    #[test]
    fn test_subtrees_allowed() {
        let policies = &*MOUNTPOINT_POLICIES;
        for path in ["/var", "/var/log", "/home", "/opt/app", "/usr", "/data/db"] {
            assert!(policies.check(path).is_ok(), "{} should be allowed", path);
        }
    }

    #[test]
    fn test_denied_subtrees() {
        let policies = &*MOUNTPOINT_POLICIES;
        assert!(policies.check("/var/run").is_err());
        assert!(policies.check("/var/lock/sub").is_err());
    }

    #[test]
    fn test_prefix_is_component_wise() {
        let policies = &*MOUNTPOINT_POLICIES;
        // "/variable" is not below "/var"; it falls back to the exact "/".
        assert!(policies.check("/variable").is_err());
    }

    #[test]
    fn test_clean_mountpoint() {
        assert_eq!(clean_mountpoint("/").unwrap(), "/");
        assert_eq!(clean_mountpoint("//").unwrap(), "/");
        assert_eq!(clean_mountpoint("/var//log/").unwrap(), "/var/log");
        assert_eq!(clean_mountpoint("/./var").unwrap(), "/var");
        assert!(clean_mountpoint("var").is_err());
        assert!(clean_mountpoint("/var/../etc").is_err());
    }
}
