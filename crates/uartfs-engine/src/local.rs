use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;
use uartfs_message::{DirEntry, FileKind, FileStat, Handle, OpenMode, Whence, CURRENT_POSITION};

use crate::adapter::{FileSystem, FsError, FsResult};
use crate::config::LocalFsConfig;
use crate::handle::HandleTable;

#[derive(Debug)]
struct OpenFile {
    file: File,
    path: PathBuf,
    mode: OpenMode,
    cursor: u64,
}

/// [`FileSystem`] over a directory of the local filesystem.
///
/// Host paths are resolved under `root`; `..` is refused, so the host cannot
/// reach outside it. Writes and deletes under a read-only prefix fail with
/// `PermissionDenied` before anything touches the disk.
#[derive(Debug)]
pub struct LocalFileSystem {
    root: PathBuf,
    read_only: Vec<PathBuf>,
    handles: HandleTable<OpenFile>,
}

impl LocalFileSystem {
    /// Serve `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>, max_open_files: usize) -> std::io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root,
            read_only: Vec::new(),
            handles: HandleTable::new(max_open_files),
        })
    }

    pub fn from_config(config: &LocalFsConfig) -> std::io::Result<Self> {
        let mut fs = Self::new(&config.root, config.max_open_files)?;
        for prefix in &config.read_only {
            fs = fs.with_read_only(prefix).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid read-only mount `{prefix}`"),
                )
            })?;
        }
        Ok(fs)
    }

    /// Refuse writes and deletes at or below `prefix`.
    pub fn with_read_only(mut self, prefix: &str) -> FsResult<Self> {
        self.read_only.push(normalize(prefix)?);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn open_files(&self) -> usize {
        self.handles.len()
    }

    fn resolve(&self, path: &str) -> FsResult<(PathBuf, PathBuf)> {
        let relative = normalize(path)?;
        let full = self.root.join(&relative);

        // Symlinks may still point outside the root.
        let probe = if full.exists() {
            Some(full.clone())
        } else {
            full.parent().map(Path::to_path_buf)
        };
        if let Some(canonical) = probe.and_then(|p| p.canonicalize().ok()) {
            if !canonical.starts_with(&self.root) {
                debug!(path, "path escapes the served root");
                return Err(FsError::PermissionDenied);
            }
        }
        Ok((relative, full))
    }

    fn is_read_only(&self, relative: &Path) -> bool {
        self.read_only.iter().any(|prefix| relative.starts_with(prefix))
    }

    fn position(open: &OpenFile, offset: u32) -> u64 {
        if offset == CURRENT_POSITION {
            open.cursor
        } else {
            u64::from(offset)
        }
    }
}

/// Host path to a root-relative path with only normal components.
fn normalize(path: &str) -> FsResult<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir | Component::Prefix(_) => return Err(FsError::PermissionDenied),
        }
    }
    Ok(out)
}

fn offset_to_u32(offset: u64) -> FsResult<u32> {
    u32::try_from(offset).map_err(|_| FsError::Io(format!("offset {offset} exceeds 32 bits")))
}

fn kind_of(file_type: fs::FileType) -> FileKind {
    if file_type.is_file() {
        FileKind::File
    } else if file_type.is_dir() {
        FileKind::Dir
    } else {
        FileKind::Other
    }
}

fn mtime_of(meta: &fs::Metadata) -> u32 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

fn size_of(meta: &fs::Metadata) -> u32 {
    meta.len().min(u64::from(u32::MAX)) as u32
}

impl FileSystem for LocalFileSystem {
    fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Handle> {
        let (relative, full) = self.resolve(path)?;
        if mode.writable() && self.is_read_only(&relative) {
            debug!(path, %mode, "write open under read-only mount refused");
            return Err(FsError::PermissionDenied);
        }
        if self.handles.is_full() {
            return Err(FsError::OutOfSpace);
        }
        if full.is_dir() {
            return Err(FsError::Io(format!("{path} is a directory")));
        }

        let file = OpenOptions::new()
            .read(mode.readable())
            .write(mode.writable() && !mode.appends())
            .append(mode.appends())
            .create(mode.creates())
            .truncate(mode.truncates())
            .open(&full)?;

        let handle = self.handles.insert(OpenFile {
            file,
            path: relative,
            mode,
            cursor: 0,
        })?;
        debug!(path, %mode, %handle, "opened");
        Ok(handle)
    }

    fn read(&mut self, handle: Handle, offset: u32, len: u32) -> FsResult<Vec<u8>> {
        let open = self.handles.get_mut(handle)?;
        if !open.mode.readable() {
            return Err(FsError::PermissionDenied);
        }
        let pos = Self::position(open, offset);
        open.file.seek(SeekFrom::Start(pos))?;

        let mut data = Vec::with_capacity(len as usize);
        (&mut open.file).take(u64::from(len)).read_to_end(&mut data)?;
        open.cursor = pos + data.len() as u64;
        Ok(data)
    }

    fn write(&mut self, handle: Handle, offset: u32, data: &[u8]) -> FsResult<u32> {
        let open = self.handles.get_mut(handle)?;
        if !open.mode.writable() {
            return Err(FsError::PermissionDenied);
        }
        if open.mode.appends() {
            // O_APPEND moves every write to the end regardless of offset.
            open.file.write_all(data)?;
            open.cursor = open.file.stream_position()?;
        } else {
            let pos = Self::position(open, offset);
            open.file.seek(SeekFrom::Start(pos))?;
            open.file.write_all(data)?;
            open.cursor = pos + data.len() as u64;
        }
        Ok(data.len() as u32)
    }

    fn seek(&mut self, handle: Handle, offset: i32, whence: Whence) -> FsResult<u32> {
        let open = self.handles.get_mut(handle)?;
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => open.cursor,
            Whence::End => open.file.metadata()?.len(),
        };
        let target = base as i64 + i64::from(offset);
        if target < 0 {
            return Err(FsError::Io(format!("seek before start of {}", open.path.display())));
        }
        let new = offset_to_u32(target as u64)?;
        open.cursor = u64::from(new);
        Ok(new)
    }

    fn close(&mut self, handle: Handle) -> FsResult<()> {
        let open = self.handles.remove(handle)?;
        debug!(%handle, path = %open.path.display(), "closed");
        Ok(())
    }

    fn stat(&mut self, path: &str) -> FsResult<FileStat> {
        let (_, full) = self.resolve(path)?;
        let meta = fs::metadata(&full)?;
        Ok(FileStat {
            size: size_of(&meta),
            kind: kind_of(meta.file_type()),
            mtime: mtime_of(&meta),
        })
    }

    fn list(&mut self, path: &str) -> FsResult<Vec<DirEntry>> {
        let (_, full) = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let size = entry.metadata().map(|m| size_of(&m)).unwrap_or(0);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: kind_of(file_type),
                size,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn delete(&mut self, path: &str) -> FsResult<()> {
        let (relative, full) = self.resolve(path)?;
        if relative.as_os_str().is_empty() || self.is_read_only(&relative) {
            debug!(path, "delete refused");
            return Err(FsError::PermissionDenied);
        }
        if fs::symlink_metadata(&full)?.is_dir() {
            fs::remove_dir(&full)?;
        } else {
            fs::remove_file(&full)?;
        }
        Ok(())
    }

    fn close_all(&mut self) -> usize {
        let closed = self.handles.clear();
        if closed > 0 {
            debug!(closed, "released all handles");
        }
        closed
    }
}
