//! Staging and atomic commit of rendered output.
//!
//! Rendered bytes are written to a temporary file next to the destination,
//! so the final rename stays on one filesystem. Until [`StagedFile::commit`]
//! succeeds the destination keeps its previous content; dropping a
//! [`StagedFile`] removes the temporary file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::DEFAULT_FILE_MODE;

/// Most recent render result of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagedOutput {
    data: Vec<u8>,
}

impl StagedOutput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Mode and ownership a committed destination must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttrs {
    pub mode: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileAttrs {
    /// Resolve attributes for `dest`.
    ///
    /// Without a configured mode an existing destination keeps its mode and a
    /// new one gets [`DEFAULT_FILE_MODE`].
    pub fn resolve(dest: &Path, mode: Option<u32>, uid: Option<u32>, gid: Option<u32>) -> Self {
        let mode = mode
            .or_else(|| fs::metadata(dest).ok().map(|m| permission_bits(&m)))
            .unwrap_or(DEFAULT_FILE_MODE);
        Self { mode, uid, gid }
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

/// Whether `dest` differs from `staged` in content or attributes.
///
/// A missing destination counts as empty content with no attributes: only a
/// non-empty render needs a write.
pub fn needs_update(dest: &Path, staged: &[u8], attrs: &FileAttrs) -> io::Result<bool> {
    let current = match fs::read(dest) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(!staged.is_empty()),
        Err(e) => return Err(e),
    };
    if current != staged {
        debug!("{:?} content differs from staged output", dest);
        return Ok(true);
    }
    let metadata = fs::metadata(dest)?;
    Ok(!attrs_match(&metadata, attrs))
}

#[cfg(unix)]
fn attrs_match(metadata: &fs::Metadata, attrs: &FileAttrs) -> bool {
    use std::os::unix::fs::MetadataExt;
    permission_bits(metadata) == attrs.mode
        && attrs.uid.map_or(true, |uid| metadata.uid() == uid)
        && attrs.gid.map_or(true, |gid| metadata.gid() == gid)
}

#[cfg(not(unix))]
fn attrs_match(_metadata: &fs::Metadata, _attrs: &FileAttrs) -> bool {
    true
}

/// A candidate destination written to a temporary file.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    dest: PathBuf,
}

impl StagedFile {
    /// Write `data` beside `dest` and apply `attrs`.
    pub fn create(dest: &Path, data: &[u8], attrs: &FileAttrs) -> io::Result<Self> {
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "confsync".to_string());

        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .tempfile_in(dir)?;
        temp.write_all(data)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        apply_attrs(temp.path(), attrs)?;

        debug!("Staged {} bytes for {:?} at {:?}", data.len(), dest, temp.path());
        Ok(Self {
            temp,
            dest: dest.to_path_buf(),
        })
    }

    /// Path of the temporary file.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically rename the staged file over the destination.
    pub fn commit(self) -> io::Result<()> {
        let dest = self.dest;
        self.temp.persist(&dest).map_err(|e| e.error)?;
        debug!("Committed {:?}", dest);
        Ok(())
    }
}

#[cfg(unix)]
fn apply_attrs(path: &Path, attrs: &FileAttrs) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(attrs.mode))?;
    if attrs.uid.is_some() || attrs.gid.is_some() {
        std::os::unix::fs::chown(path, attrs.uid, attrs.gid)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_attrs(_path: &Path, _attrs: &FileAttrs) -> io::Result<()> {
    Ok(())
}
