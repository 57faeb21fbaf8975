//! Lexical path arithmetic and logical-path matching.
//!
//! Nothing here touches the filesystem. Symlinks are never resolved, so a
//! path means the same thing whether or not it currently exists.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components, fold `..` into the
/// preceding component where possible, and collapse separators.
///
/// An empty relative result becomes `.`. `..` at the filesystem root is
/// dropped, matching how the kernel resolves `/..`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Make a path absolute against `cwd` and normalize it.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&cwd.join(path))
    }
}

/// Express the absolute path `path` relative to the absolute directory
/// `base`, climbing with `..` as needed. Equal paths give `.`.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path = normalize(path);
    let base = normalize(base);
    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }

    if rel.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        rel
    }
}

/// True if `path` is `dir` or lies beneath it, compared component-wise.
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

/// The catalog's logical path: the normalized join of a row's root-relative
/// path, directory and filename.
pub fn logical_path(root_rel: &str, directory: &str, filename: &str) -> String {
    let joined = Path::new(root_rel).join(directory).join(filename);
    normalize(&joined).to_string_lossy().into_owned()
}

/// A normalized, cwd-relative prefix used to select catalog rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix(PathBuf);

impl Prefix {
    /// Normalize a user-supplied prefix. Absolute prefixes never name catalog
    /// rows and yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let path = Path::new(value);
        if path.is_absolute() {
            return None;
        }
        Some(Prefix(normalize(path)))
    }

    /// Normalize a list of prefixes, dropping absolute ones.
    pub fn parse_all<S: AsRef<str>>(values: &[S]) -> Vec<Self> {
        values
            .iter()
            .filter_map(|v| Self::parse(v.as_ref()))
            .collect()
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    fn is_cwd(&self) -> bool {
        self.0.as_path() == Path::new(".")
    }

    /// True if the logical path is exactly this prefix.
    pub fn matches_exact(&self, logical: &str) -> bool {
        Path::new(logical) == self.0.as_path()
    }

    /// True if the logical path is this prefix or lies beneath it.
    ///
    /// Matching respects component boundaries: `ab` matches `ab/x` but not
    /// `abc/x`. The prefix `.` matches every path that stays inside the
    /// working directory.
    pub fn matches_recursive(&self, logical: &str) -> bool {
        let path = Path::new(logical);
        if self.is_cwd() {
            return !matches!(path.components().next(), Some(Component::ParentDir));
        }
        path.starts_with(&self.0)
    }

    /// True if the logical path lies strictly beneath this prefix.
    pub fn is_ancestor_of(&self, logical: &str) -> bool {
        self.matches_recursive(logical) && !self.matches_exact(logical)
    }

    pub fn matches(&self, logical: &str, recursive: bool) -> bool {
        if recursive {
            self.matches_recursive(logical)
        } else {
            self.matches_exact(logical)
        }
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
