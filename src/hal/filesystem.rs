use crate::daemon::types::AcpuError;

use std::{fs, io, path};

const ALLOWED_PREFIXES: [&str; 2] = ["/proc/", "/sys/"];

/// A seekable handle on an open kernel file. Readers that poll the same file
/// rewind the handle instead of reopening it.
pub trait FileStream: io::Read + io::Seek + Send {}

impl<T: io::Read + io::Seek + Send> FileStream for T {}

/// Filesystem access used by the CPU feature readers. Tests substitute an
/// in-memory implementation.
pub trait Filesystem: Send + Sync {
    fn open_stream(&self, path: &str) -> Result<Box<dyn FileStream>, AcpuError>;
    fn read_to_string(&self, path: &str) -> Result<String, AcpuError>;
    fn list_directory(&self, path: &str) -> Result<Vec<String>, AcpuError>;
}

pub struct RealFilesystem;

fn validate_path_secure(path_str: &str) -> Result<(), AcpuError> {
    let path = path::Path::new(path_str);
    let canonical_path = fs::canonicalize(path).map_err(|e| {
        AcpuError::InvalidInput(format!("Path resolution failed for {}: {}", path_str, e))
    })?;
    let canonical_str = canonical_path
        .to_str()
        .ok_or_else(|| AcpuError::InvalidInput("Non-UTF8 path".to_string()))?;
    if ALLOWED_PREFIXES
        .iter()
        .any(|&prefix| canonical_str.starts_with(prefix))
    {
        Ok(())
    } else {
        Err(AcpuError::InvalidInput(format!(
            "Access denied: {}",
            canonical_str
        )))
    }
}

impl Filesystem for RealFilesystem {
    fn open_stream(&self, path: &str) -> Result<Box<dyn FileStream>, AcpuError> {
        validate_path_secure(path)?;
        let file = fs::OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(AcpuError::Io)?;
        Ok(Box::new(file))
    }

    fn read_to_string(&self, path: &str) -> Result<String, AcpuError> {
        validate_path_secure(path)?;
        fs::read_to_string(path).map_err(AcpuError::Io)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<String>, AcpuError> {
        validate_path_secure(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(AcpuError::Io)? {
            let entry = entry.map_err(AcpuError::Io)?;
            match entry.file_name().into_string() {
                Ok(name) => entries.push(name),
                Err(_) => log::debug!("Skipping non-UTF8 entry under {}", path),
            }
        }
        Ok(entries)
    }
}
