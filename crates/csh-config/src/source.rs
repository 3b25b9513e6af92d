// SPDX-License-Identifier: MIT OR Apache-2.0
//! Config source abstraction.
//!
//! Documents are always addressed by a path **relative to the root**; both
//! variants reject absolute paths and `..` traversal so a hostile document
//! reference cannot read outside the configuration tree.

use crate::ConfigError;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Where configuration documents are read from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A rooted filesystem directory.
    Dir(PathBuf),
    /// An embedded resource tree: relative path to document contents.
    Embedded(BTreeMap<String, String>),
}

impl ConfigSource {
    /// Create a filesystem source rooted at `root`.
    pub fn dir(root: impl Into<PathBuf>) -> Self {
        Self::Dir(root.into())
    }

    /// Create an embedded source from `(path, contents)` pairs.
    pub fn embedded<I, P, C>(documents: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self::Embedded(
            documents
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        )
    }

    /// Read the document at `relative`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::PathEscape`] when the path is absolute or contains a
    /// parent-directory component; [`ConfigError::NotFound`] when no such
    /// document exists; [`ConfigError::Io`] for other read failures.
    pub fn read(&self, relative: &str) -> Result<String, ConfigError> {
        check_contained(relative)?;
        match self {
            Self::Dir(root) => {
                let path = root.join(relative);
                match std::fs::read_to_string(&path) {
                    Ok(text) => Ok(text),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        Err(ConfigError::NotFound {
                            path: relative.to_string(),
                        })
                    }
                    Err(err) => Err(ConfigError::Io {
                        path: relative.to_string(),
                        reason: err.to_string(),
                    }),
                }
            }
            Self::Embedded(documents) => documents
                .get(relative)
                .cloned()
                .ok_or_else(|| ConfigError::NotFound {
                    path: relative.to_string(),
                }),
        }
    }
}

/// Reject paths that could escape the root.
fn check_contained(relative: &str) -> Result<(), ConfigError> {
    let path = Path::new(relative);
    if path.is_absolute() {
        return Err(ConfigError::PathEscape {
            path: relative.to_string(),
        });
    }
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::PathEscape {
                    path: relative.to_string(),
                });
            }
            Component::Normal(_) | Component::CurDir => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn embedded_source_reads_documents() {
        let source = ConfigSource::embedded([("a/b.yaml", "x: 1")]);
        assert_eq!(source.read("a/b.yaml").unwrap(), "x: 1");
    }

    #[test]
    fn embedded_missing_document_is_not_found() {
        let source = ConfigSource::embedded([("a.yaml", "x: 1")]);
        assert!(matches!(
            source.read("b.yaml"),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn parent_traversal_is_rejected() {
        let source = ConfigSource::embedded([("a.yaml", "x: 1")]);
        assert!(matches!(
            source.read("../a.yaml"),
            Err(ConfigError::PathEscape { .. })
        ));
        assert!(matches!(
            source.read("b/../../a.yaml"),
            Err(ConfigError::PathEscape { .. })
        ));
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let source = ConfigSource::embedded([("a.yaml", "x: 1")]);
        assert!(matches!(
            source.read("/etc/passwd"),
            Err(ConfigError::PathEscape { .. })
        ));
    }

    #[test]
    fn dir_source_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cheshire.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "metadata:").unwrap();
        writeln!(f, "  name: demo").unwrap();

        let source = ConfigSource::dir(dir.path());
        let text = source.read("cheshire.yaml").unwrap();
        assert!(text.contains("demo"));
    }

    #[test]
    fn dir_source_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::dir(dir.path());
        assert!(matches!(
            source.read("ghost.yaml"),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn dir_source_also_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::dir(dir.path());
        assert!(matches!(
            source.read("../outside.yaml"),
            Err(ConfigError::PathEscape { .. })
        ));
    }
}
