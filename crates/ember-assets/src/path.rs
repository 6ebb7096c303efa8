//! Normalized asset paths.
//!
//! Paths are the lookup key for file-backed records, so every path handed to
//! the server is normalized lexically first: separators become `/`, `.`
//! components are dropped and `..` is resolved against the preceding
//! component. The file system is never consulted.

use std::fmt;
use std::path::Path;

/// A normalized, `/`-separated asset path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetPath {
    normalized: String,
}

impl AssetPath {
    /// Normalize `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let raw = path.as_ref().to_string_lossy();
        Self {
            normalized: normalize(&raw),
        }
    }

    /// The empty path, used by records that were created in memory.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The normalized path, always using `/` separators.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// The normalized path as a [`Path`], for joining onto the asset root.
    pub fn as_path(&self) -> &Path {
        Path::new(&self.normalized)
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// The final component.
    pub fn file_name(&self) -> Option<&str> {
        self.normalized
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }

    /// The final component without its extension.
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => Some(stem),
            _ => Some(name),
        }
    }

    /// The lower-cased extension, without the leading dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                Some(ext.to_ascii_lowercase())
            }
            _ => None,
        }
    }
}

/// Normalize an extension key: trimmed, lower-cased, no leading dot.
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn normalize(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                // `..` above the root of an absolute path is the root.
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl AsRef<str> for AssetPath {
    fn as_ref(&self) -> &str {
        &self.normalized
    }
}

impl From<&str> for AssetPath {
    fn from(path: &str) -> Self {
        AssetPath::new(path)
    }
}

impl From<String> for AssetPath {
    fn from(path: String) -> Self {
        AssetPath::new(path)
    }
}

impl From<&String> for AssetPath {
    fn from(path: &String) -> Self {
        AssetPath::new(path)
    }
}

impl From<&Path> for AssetPath {
    fn from(path: &Path) -> Self {
        AssetPath::new(path)
    }
}

impl From<std::path::PathBuf> for AssetPath {
    fn from(path: std::path::PathBuf) -> Self {
        AssetPath::new(path)
    }
}

impl From<&AssetPath> for AssetPath {
    fn from(path: &AssetPath) -> Self {
        path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(AssetPath::new("models/cube.mesh").as_str(), "models/cube.mesh");
        assert_eq!(AssetPath::new("./models//cube.mesh").as_str(), "models/cube.mesh");
        assert_eq!(AssetPath::new("models\\lod\\..\\cube.mesh").as_str(), "models/cube.mesh");
        assert_eq!(AssetPath::new("../shared/a.png").as_str(), "../shared/a.png");
        assert_eq!(AssetPath::new("/assets/../x.png").as_str(), "/x.png");
        assert_eq!(AssetPath::new("/../x.png").as_str(), "/x.png");
    }

    #[test]
    fn test_same_file_same_key() {
        assert_eq!(AssetPath::new("a/b/../c.mesh"), AssetPath::new("a/./c.mesh"));
    }

    #[test]
    fn test_extension_extraction() {
        assert_eq!(AssetPath::new("models/cube.MESH").extension().as_deref(), Some("mesh"));
        assert_eq!(AssetPath::new("archive.tar.gz").extension().as_deref(), Some("gz"));
        assert_eq!(AssetPath::new("models/.hidden").extension(), None);
        assert_eq!(AssetPath::new("models/noext").extension(), None);
        assert_eq!(AssetPath::empty().extension(), None);
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(AssetPath::new("models/cube.mesh").file_stem(), Some("cube"));
        assert_eq!(AssetPath::new("README").file_stem(), Some("README"));
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".GLSL"), "glsl");
        assert_eq!(normalize_extension("mesh"), "mesh");
        assert_eq!(normalize_extension(" .Png "), "png");
    }
}
