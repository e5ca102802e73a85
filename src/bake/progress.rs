//! Progress file shared with a parent process: a single integer percentage,
//! rewritten after every bake.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// `<tmp>/node_forge_bake_progress_<pid>.txt`
pub fn default_progress_path(pid: u32) -> PathBuf {
    std::env::temp_dir().join(format!("node_forge_bake_progress_{pid}.txt"))
}

#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: Option<PathBuf>,
    total: usize,
    current: usize,
}

impl ProgressFile {
    pub fn new(path: Option<PathBuf>, total: usize) -> Self {
        Self {
            path,
            total,
            current: 0,
        }
    }

    /// No file; progress is only tracked in memory.
    pub fn disabled(total: usize) -> Self {
        Self::new(None, total)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current.min(self.total) * 100) / self.total) as u8
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Count one finished bake and persist.
    pub fn advance(&mut self) -> u8 {
        self.current += 1;
        let pct = self.percent();
        self.write(pct);
        pct
    }

    pub fn complete(&mut self) {
        self.current = self.total;
        self.write(100);
    }

    fn write(&self, pct: u8) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = std::fs::write(path, pct.to_string()) {
            log::warn!("could not write progress file {}: {e}", path.display());
        }
    }
}

/// Read a percentage written by [`ProgressFile`]. A missing or half-written
/// file reads as `None`.
pub fn read_progress(path: &Path) -> Result<Option<u8>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read progress file {}", path.display()))?;
    Ok(text.trim().parse::<u8>().ok().map(|p| p.min(100)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_written_after_each_step() {
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("nfb_progress_{nonce}.txt"));
        let mut p = ProgressFile::new(Some(path.clone()), 4);
        assert_eq!(p.advance(), 25);
        assert_eq!(read_progress(&path).unwrap(), Some(25));
        p.advance();
        p.advance();
        assert_eq!(p.advance(), 100);
        assert_eq!(read_progress(&path).unwrap(), Some(100));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_plan_is_complete() {
        assert_eq!(ProgressFile::disabled(0).percent(), 100);
    }
}
