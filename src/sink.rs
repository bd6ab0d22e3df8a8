//! Download sinks: where an emitted document goes

use crate::{Error, Result};
use log::info;
use std::path::PathBuf;
use std::sync::Mutex;

/// Terminal "trigger file download" primitive
pub trait DownloadSink: Send + Sync {
    /// Persist `bytes` under `filename`; returns the saved location if the
    /// sink has one.
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<Option<PathBuf>>;
}

/// Writes documents into a directory
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

impl DownloadSink for FileSink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<Option<PathBuf>> {
        if filename.contains('/') || filename.contains('\\') || filename == ".." {
            return Err(Error::SaveError(format!("refusing to save outside the output directory: {}", filename)));
        }
        if !self.dir.is_dir() {
            return Err(Error::SaveError(format!(
                "output directory {} does not exist",
                self.dir.display()
            )));
        }

        let path = self.dir.join(filename);
        std::fs::write(&path, bytes)
            .map_err(|e| Error::SaveError(format!("Failed to write {}: {}", path.display(), e)))?;
        info!("saved {} ({} bytes)", path.display(), bytes.len());
        Ok(Some(path))
    }
}

/// Keeps emitted documents in memory
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names and bytes of every document saved so far, in save order
    pub fn saved(&self) -> Vec<(String, Vec<u8>)> {
        self.saved.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DownloadSink for MemorySink {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<Option<PathBuf>> {
        self.saved
            .lock()
            .unwrap()
            .push((filename.to_string(), bytes.to_vec()));
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_saves() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.save("a.pdf", b"%PDF").unwrap(), None);
        assert_eq!(sink.saved(), vec![("a.pdf".to_string(), b"%PDF".to_vec())]);
    }

    #[test]
    fn file_sink_writes_into_directory() {
        let dir = std::env::temp_dir().join(format!("rfdocgen-sink-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sink = FileSink::new(&dir);
        let path = sink.save("out.pdf", b"%PDF-1.5").unwrap().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_sink_rejects_missing_dir_and_traversal() {
        let sink = FileSink::new("/definitely/not/a/dir");
        assert!(matches!(sink.save("x.pdf", b""), Err(Error::SaveError(_))));
        let sink = FileSink::new(std::env::temp_dir());
        assert!(matches!(sink.save("../x.pdf", b""), Err(Error::SaveError(_))));
    }
}
