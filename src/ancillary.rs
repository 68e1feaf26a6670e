//! Auxiliary model file loaded at startup.
//!
//! The stream never depends on it: a missing or unreadable file is logged
//! and startup carries on.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// XML cascade description (`<opencv_storage>` root)
    CascadeXml,
    /// Some other XML document
    Xml,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct AncillaryModel {
    pub path: PathBuf,
    pub size: usize,
    pub format: ModelFormat,
}

pub fn load_model(path: &Path) -> Result<AncillaryModel> {
    let bytes = std::fs::read(path).map_err(|source| Error::ModelLoad {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(AncillaryModel {
        path: path.to_path_buf(),
        size: bytes.len(),
        format: sniff(&bytes),
    })
}

/// Load the model if possible, logging the outcome either way
pub fn load_best_effort(path: &Path) -> Option<AncillaryModel> {
    match load_model(path) {
        Ok(model) => {
            info!(
                "Loaded model {} ({} bytes, {:?})",
                model.path.display(),
                model.size,
                model.format
            );
            Some(model)
        }
        Err(e) => {
            warn!("{}; continuing without it", e);
            None
        }
    }
}

fn sniff(bytes: &[u8]) -> ModelFormat {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let head = head.trim_start_matches('\u{feff}').trim_start();
    if !head.starts_with('<') {
        return ModelFormat::Unknown;
    }
    if head.contains("<opencv_storage>") {
        ModelFormat::CascadeXml
    } else {
        ModelFormat::Xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("motioncam-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_cascade_file_recognized() {
        let path = write_temp(
            "cascade.xml",
            b"<?xml version=\"1.0\"?>\n<opencv_storage>\n<cascade></cascade>\n</opencv_storage>\n",
        );
        let model = load_model(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(model.format, ModelFormat::CascadeXml);
        assert!(model.size > 0);
    }

    #[test]
    fn test_binary_file_loads_as_unknown() {
        let path = write_temp("model.bin", &[0u8, 1, 2, 3]);
        let model = load_model(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(model.format, ModelFormat::Unknown);
        assert_eq!(model.size, 4);
    }

    #[test]
    fn test_missing_file_does_not_block() {
        let path = Path::new("/nonexistent/haarcascade.xml");
        assert!(matches!(load_model(path), Err(Error::ModelLoad { .. })));
        assert!(load_best_effort(path).is_none());
    }
}
