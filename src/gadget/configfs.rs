//! ConfigFS file operations for the USB gadget tree

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{GadgetError, Result};

/// Value written to the pull-up file to disconnect the gadget
pub const PULLUP_NONE: &str = "none";

/// Write string content to a sysfs/configfs attribute.
///
/// IMPORTANT: sysfs attributes require a single atomic write() syscall.
/// The kernel processes the value on the first write(), so the complete
/// buffer (including newline) is built before writing.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    // O_WRONLY without O_TRUNC - O_TRUNC may fail on special files
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| GadgetError::configfs(path, e))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .map_err(|e| GadgetError::configfs(path, e))?;

    // A shorter value over a longer one must not leave stale bytes on
    // regular files; sysfs attributes reject ftruncate, so ignore that.
    let _ = file.set_len(data.len() as u64);

    // Explicitly flush to ensure sysfs processes the write
    file.flush().map_err(|e| GadgetError::configfs(path, e))?;

    Ok(())
}

/// Read a trimmed string from a sysfs attribute
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| GadgetError::configfs(path, e))
}

/// Create directory if not exists
pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| GadgetError::configfs(path, e))
}

/// Remove a config-tree symlink, ignoring a missing target
pub fn remove_link(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GadgetError::configfs(path, e)),
    }
}

/// Create symlink
pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| {
        GadgetError::ConfigFs {
            path: dest.display().to_string(),
            reason: format!("symlink to {}: {}", src.display(), e),
        }
    })
}

/// List the `function<N>` links inside a gadget configuration directory
pub fn list_function_links(config_path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = fs::read_dir(config_path).map_err(|e| GadgetError::configfs(config_path, e))?;

    let mut links = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with("function") {
            links.push(entry.path());
        }
    }
    // Deterministic unlink order
    links.sort();
    Ok(links)
}
