use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::io;
use tempfile::TempDir;
use thiserror::Error;

/// A resource name that would place its target outside the staging root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathTraversalError {
    #[error("Security: resource name contains parent directory traversal '..': {0}")]
    ParentComponent(String),
    #[error("Security: resource name appears absolute: {0}")]
    Absolute(String),
    #[error("Security: resource name resolves outside the staging root: {0}")]
    EscapesRoot(String),
    #[error("resource name does not name anything below the staging root: {0:?}")]
    Empty(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Traversal(#[from] PathTraversalError),
    #[error("io error preparing {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Utf8Path) -> impl FnOnce(io::Error) -> ResolveError + '_ {
    move |source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct PathResolver;

impl PathResolver {
    /// Lexically validate a resource name and return it as a clean relative path.
    /// `.` segments are dropped; `..`, roots and drive prefixes are rejected.
    pub fn validate_name(name: &str) -> Result<Utf8PathBuf, PathTraversalError> {
        let mut rel = Utf8PathBuf::new();
        for component in Utf8Path::new(name).components() {
            match component {
                Utf8Component::Normal(part) => rel.push(part),
                Utf8Component::CurDir => {}
                Utf8Component::ParentDir => {
                    return Err(PathTraversalError::ParentComponent(name.to_string()))
                }
                Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                    return Err(PathTraversalError::Absolute(name.to_string()))
                }
            }
        }
        if rel.as_str().is_empty() {
            return Err(PathTraversalError::Empty(name.to_string()));
        }
        Ok(rel)
    }

    /// Compute the absolute target path for `name` below `root` and create its
    /// parent directories. Nothing is created when the name is rejected.
    pub fn resolve(root: &Utf8Path, name: &str) -> Result<Utf8PathBuf, ResolveError> {
        let rel = Self::validate_name(name)?;
        let root = root.canonicalize_utf8().map_err(io_err(root))?;
        let target = root.join(&rel);

        // Symlinks already present in the staging tree may point anywhere.
        Self::check_existing_ancestor(&root, &target, name)?;

        let parent = target
            .parent()
            .ok_or_else(|| PathTraversalError::Empty(name.to_string()))?;
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;

        let parent = parent.canonicalize_utf8().map_err(io_err(parent))?;
        if !parent.starts_with(&root) {
            return Err(PathTraversalError::EscapesRoot(name.to_string()).into());
        }
        let file_name = target
            .file_name()
            .ok_or_else(|| PathTraversalError::Empty(name.to_string()))?;
        Ok(parent.join(file_name))
    }

    fn check_existing_ancestor(
        root: &Utf8Path,
        target: &Utf8Path,
        name: &str,
    ) -> Result<(), ResolveError> {
        let mut probe = Some(target);
        while let Some(p) = probe {
            if p.symlink_metadata().is_ok() {
                let canonical = match p.canonicalize_utf8() {
                    Ok(c) => c,
                    // Dangling link.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        return Err(PathTraversalError::EscapesRoot(name.to_string()).into())
                    }
                    Err(e) => return Err(io_err(p)(e)),
                };
                if !canonical.starts_with(root) {
                    return Err(PathTraversalError::EscapesRoot(name.to_string()).into());
                }
                return Ok(());
            }
            probe = p.parent();
        }
        Ok(())
    }
}

/// Scratch root shared by every session of one user.
///
/// A temporary staging directory is removed when dropped; an explicit one is kept.
#[derive(Debug)]
pub struct StagingDirectory {
    root: Utf8PathBuf,
    _temp: Option<TempDir>,
}

impl StagingDirectory {
    pub fn temporary(prefix: &str) -> io::Result<Self> {
        let temp = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let root = Utf8Path::from_path(temp.path())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 temp path"))?
            .canonicalize_utf8()?;
        Ok(Self {
            root,
            _temp: Some(temp),
        })
    }

    pub fn at(path: &Utf8Path) -> io::Result<Self> {
        std::fs::create_dir_all(path)?;
        Ok(Self {
            root: path.canonicalize_utf8()?,
            _temp: None,
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }

    pub fn resolve(&self, name: &str) -> Result<Utf8PathBuf, ResolveError> {
        PathResolver::resolve(&self.root, name)
    }
}
