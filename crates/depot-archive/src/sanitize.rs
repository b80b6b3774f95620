use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Result of sanitizing an archive entry path.
#[derive(Clone, Debug)]
pub struct SanitizedPath {
    pub original: PathBuf,
    pub resolved: PathBuf,
}

/// Resolve an archive entry path against `base`, rejecting anything that
/// would land outside it.
pub fn sanitize_path<P: AsRef<Path>, B: AsRef<Path>>(entry_path: P, base: B) -> Result<SanitizedPath> {
    let entry_path = entry_path.as_ref();
    let base = normalize_path(base.as_ref());

    if entry_path.has_root() {
        return Err(Error::ZipSlip {
            entry: entry_path.to_path_buf(),
            resolved: entry_path.to_path_buf(),
        });
    }

    let resolved = normalize_path(&base.join(entry_path));
    if !resolved.starts_with(&base) {
        return Err(Error::ZipSlip {
            entry: entry_path.to_path_buf(),
            resolved,
        });
    }

    Ok(SanitizedPath {
        original: entry_path.to_path_buf(),
        resolved,
    })
}

/// Check that a symlink created at `symlink_location` pointing to `target`
/// stays within `base`. Returns the resolved absolute target.
pub fn sanitize_symlink_target<P: AsRef<Path>, L: AsRef<Path>, B: AsRef<Path>>(
    target: P,
    symlink_location: L,
    base: B,
) -> Result<PathBuf> {
    let target = target.as_ref();
    let symlink_location = symlink_location.as_ref();
    let base = normalize_path(base.as_ref());

    if target.has_root() {
        return Err(Error::AbsoluteSymlinkTarget {
            target: target.to_path_buf(),
            symlink: symlink_location.to_path_buf(),
        });
    }

    let resolved = symlink_location
        .parent()
        .map(|p| p.join(target))
        .unwrap_or_else(|| target.to_path_buf());
    let absolute = if resolved.is_absolute() { resolved } else { base.join(resolved) };
    let final_path = normalize_path(&absolute);

    if !final_path.starts_with(&base) {
        return Err(Error::SymlinkEscape {
            target: target.to_path_buf(),
            resolved: final_path,
        });
    }

    Ok(final_path)
}

/// Lexically resolve `.` and `..` components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(part) => result.push(part),
            Component::RootDir => result.push(Component::RootDir.as_os_str()),
            Component::Prefix(prefix) => result.push(prefix.as_os_str()),
            Component::CurDir => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_base_path() -> &'static Path {
        if cfg!(windows) {
            Path::new("C:/opt/cache/entry.d")
        } else {
            Path::new("/opt/cache/entry.d")
        }
    }

    #[test]
    fn basic_path_sanitization() {
        let result = sanitize_path("bin/tool", test_base_path()).unwrap();
        assert_eq!(result.original, Path::new("bin/tool"));
        assert_eq!(result.resolved, test_base_path().join("bin/tool"));
    }

    #[test]
    fn inner_parent_components_are_allowed() {
        let result = sanitize_path("bin/../lib/./libfoo.so", test_base_path()).unwrap();
        assert_eq!(result.resolved, test_base_path().join("lib/libfoo.so"));
    }

    #[test]
    fn zip_slip_protection() {
        let escaping = sanitize_path("../../etc/passwd", test_base_path());
        assert!(matches!(escaping, Err(Error::ZipSlip { .. })));

        let absolute = if cfg!(windows) { "C:\\etc\\passwd" } else { "/etc/passwd" };
        assert!(matches!(
            sanitize_path(absolute, test_base_path()),
            Err(Error::ZipSlip { .. })
        ));
    }

    #[test]
    fn symlink_target_sanitization() {
        let symlink_location = test_base_path().join("bin/mylink");
        let result = sanitize_symlink_target("../lib", symlink_location, test_base_path()).unwrap();
        assert_eq!(result, test_base_path().join("lib"));
    }

    #[test]
    fn symlink_escape_rejected() {
        let symlink_location = test_base_path().join("bin/mylink");
        let result = sanitize_symlink_target("../../../etc", symlink_location, test_base_path());
        assert!(matches!(result, Err(Error::SymlinkEscape { .. })));
    }

    #[test]
    fn symlink_absolute_path_rejected() {
        let absolute_target = if cfg!(windows) { "C:\\etc\\passwd" } else { "/etc/passwd" };
        let symlink_location = test_base_path().join("bin/mylink");
        let result = sanitize_symlink_target(absolute_target, symlink_location, test_base_path());
        assert!(matches!(result, Err(Error::AbsoluteSymlinkTarget { .. })));
    }

    #[test]
    fn path_normalization() {
        let result = normalize_path(Path::new("foo//bar/baz/../qux/./"));
        assert_eq!(result, Path::new("foo/bar/qux"));
    }
}
