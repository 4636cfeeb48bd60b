use crate::error::RenderError;
use quire_types::RenderMethod;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The shared output directory. Every render gets its own file name, and
/// files are never rewritten once created.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// A fresh, unused path: `<root>/<stem>-<uuid>.pdf`.
    pub fn allocate(&self, stem: &str) -> PathBuf {
        self.root
            .join(format!("{}-{}.pdf", stem, Uuid::new_v4().simple()))
    }
}

/// A finished render on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPdf {
    pub path: PathBuf,
    pub size: u64,
    pub method: RenderMethod,
}

impl RenderedPdf {
    /// Inspects the file a backend was asked to produce. A missing or empty
    /// file is `NoOutput`.
    pub fn from_output(method: RenderMethod, path: &Path) -> Result<Self, RenderError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RenderError::NoOutput {
                    method,
                    detail: format!("{} was not created", path.display()),
                });
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.len() == 0 {
            return Err(RenderError::NoOutput {
                method,
                detail: format!("{} is empty", path.display()),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            method,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn allocated_paths_are_unique() {
        let dir = OutputDir::new("/srv/pdf");
        let a = dir.allocate("abc");
        let b = dir.allocate("abc");
        assert_ne!(a, b);
        assert!(a.starts_with("/srv/pdf"));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("pdf"));
    }

    #[test]
    fn missing_and_empty_files_are_no_output() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.pdf");
        assert!(matches!(
            RenderedPdf::from_output(RenderMethod::Office, &path),
            Err(RenderError::NoOutput { .. })
        ));

        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            RenderedPdf::from_output(RenderMethod::Office, &path),
            Err(RenderError::NoOutput { .. })
        ));

        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let pdf = RenderedPdf::from_output(RenderMethod::Office, &path).unwrap();
        assert_eq!(pdf.size, 8);
    }
}
