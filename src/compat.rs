//! File-like access to logical files for code written against literal paths.
//!
//! While active, [`VirtualFs::open`] hands out in-memory [`VirtualFile`]s for
//! the registered logical paths and real files for everything else. A virtual
//! file is loaded from the store when opened for reading and written back
//! through the store when closed after writing.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::Profile;
use crate::registry;
use crate::{Error, LogicalFileStore, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
}

impl Mode {
    /// Accepts `open()`-style mode strings such as `"r"`, `"wb"` or `"a+"`.
    pub fn parse(mode: &str) -> Result<Self> {
        match mode.chars().next() {
            Some('r') => Ok(Self::Read),
            Some('w') => Ok(Self::Write),
            Some('a') => Ok(Self::Append),
            _ => Err(Error::Invalid(format!("unsupported file mode: {:?}", mode))),
        }
    }

    fn writes(self) -> bool {
        !matches!(self, Self::Read)
    }
}

pub struct VirtualFs {
    store: Arc<dyn LogicalFileStore>,
    active: AtomicBool,
}

impl VirtualFs {
    /// Creates the layer; it starts active unless the profile is [`Profile::Direct`].
    pub fn new(store: Arc<dyn LogicalFileStore>, profile: Profile) -> Self {
        let fs = Self {
            store,
            active: AtomicBool::new(false),
        };
        if profile == Profile::Compat {
            fs.activate();
        }
        fs
    }

    pub fn activate(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            warn!("Virtual filesystem already active");
            return;
        }
        info!("Virtual filesystem active: data/*.json access goes to the store");
    }

    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Virtual filesystem deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn intercepts(&self, path: &str) -> bool {
        self.is_active() && registry::is_logical(path)
    }

    /// Opens `path`, virtually if it is a logical file and the layer is active.
    pub async fn open(&self, path: impl AsRef<Path>, mode: Mode) -> Result<FileHandle> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy();
        if self.intercepts(&path_str) {
            debug!("Intercepted open({:?}, {:?})", path_str, mode);
            let file = VirtualFile::open(self.store.clone(), &path_str, mode).await?;
            return Ok(FileHandle::Virtual(file));
        }

        let file = match mode {
            Mode::Read => File::open(path)?,
            Mode::Write => File::create(path)?,
            Mode::Append => OpenOptions::new().append(true).create(true).open(path)?,
        };
        Ok(FileHandle::Real(file))
    }

    /// Parses the JSON content of `path`.
    pub async fn load_json(&self, path: impl AsRef<Path>) -> Result<Value> {
        let mut handle = self.open(path, Mode::Read).await?;
        let mut content = String::new();
        handle.read_to_string(&mut content)?;
        handle.close().await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Serializes `value` into `path` and closes it, persisting virtual files.
    pub async fn dump_json(&self, path: impl AsRef<Path>, value: &Value) -> Result<()> {
        let mut handle = self.open(path, Mode::Write).await?;
        serde_json::to_writer_pretty(&mut handle, value)?;
        handle.close().await
    }
}

/// Either a store-backed buffer or a real file.
pub enum FileHandle {
    Virtual(VirtualFile),
    Real(File),
}

impl FileHandle {
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    /// Flushes the handle; a virtual file opened for writing is stored now.
    pub async fn close(self) -> Result<()> {
        match self {
            Self::Virtual(f) => f.close().await,
            Self::Real(mut f) => {
                f.flush()?;
                Ok(())
            }
        }
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Virtual(f) => f.read(buf),
            Self::Real(f) => f.read(buf),
        }
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Virtual(f) => f.write(buf),
            Self::Real(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Virtual(f) => f.flush(),
            Self::Real(f) => f.flush(),
        }
    }
}

/// In-memory stand-in for one logical file.
pub struct VirtualFile {
    path: String,
    mode: Mode,
    buffer: Cursor<Vec<u8>>,
    store: Arc<dyn LogicalFileStore>,
    dirty: bool,
    closed: bool,
}

impl VirtualFile {
    async fn open(store: Arc<dyn LogicalFileStore>, path: &str, mode: Mode) -> Result<Self> {
        let initial = if mode == Mode::Read {
            // read() already degrades to the empty default when the store is down.
            let doc = store.read(path).await?;
            serde_json::to_vec(&doc).unwrap_or_else(|_| b"{}".to_vec())
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_string(),
            mode,
            buffer: Cursor::new(initial),
            store,
            dirty: false,
            closed: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current buffer content.
    pub fn contents(&self) -> &[u8] {
        self.buffer.get_ref()
    }

    /// Persists written content through the store. Reading handles close without I/O.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        if !self.mode.writes() || self.buffer.get_ref().is_empty() {
            return Ok(());
        }
        let doc: Value = serde_json::from_slice(self.buffer.get_ref())?;
        self.store.write(&self.path, &doc).await?;
        debug!("Stored {} through the virtual filesystem", self.path);
        Ok(())
    }
}

impl Read for VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read(buf)
    }
}

impl Write for VirtualFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.mode.writes() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file not open for writing"));
        }
        self.dirty = true;
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for VirtualFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl Drop for VirtualFile {
    fn drop(&mut self) {
        if self.dirty && !self.closed {
            warn!("{} dropped without close(); written data was discarded", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StorageAdapter;
    use crate::engine::MemStore;
    use crate::test_support::DownStore;
    use serde_json::json;
    use std::collections::HashMap;

    fn setup(profile: Profile) -> (Arc<StorageAdapter>, VirtualFs) {
        let adapter = Arc::new(StorageAdapter::new(
            Arc::new(MemStore::new(HashMap::new(), None)),
            "test",
        ));
        let fs = VirtualFs::new(adapter.clone(), profile);
        (adapter, fs)
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("r").unwrap(), Mode::Read);
        assert_eq!(Mode::parse("wb").unwrap(), Mode::Write);
        assert_eq!(Mode::parse("a+").unwrap(), Mode::Append);
        assert!(Mode::parse("x").is_err());
    }

    #[tokio::test]
    async fn test_dump_and_load_through_store() {
        let (adapter, fs) = setup(Profile::Compat);
        fs.dump_json("data/message.json", &json!({"message": "shift change at 6"}))
            .await
            .unwrap();

        assert_eq!(
            adapter.read("data/message.json").await.unwrap(),
            json!({"message": "shift change at 6"})
        );
        assert_eq!(
            fs.load_json("./data/message.json").await.unwrap(),
            json!({"message": "shift change at 6"})
        );
    }

    #[tokio::test]
    async fn test_read_unwritten_file_gives_default() {
        let (_, fs) = setup(Profile::Compat);
        let mut handle = fs.open("data/users.json", Mode::Read).await.unwrap();
        assert!(handle.is_virtual());
        let mut s = String::new();
        handle.read_to_string(&mut s).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&s).unwrap(), json!({"users": []}));
    }

    #[tokio::test]
    async fn test_write_is_stored_only_on_close() {
        let (adapter, fs) = setup(Profile::Compat);
        let mut handle = fs.open("data/time_entries.json", Mode::Write).await.unwrap();
        handle.write_all(br#"{"entries": [{"id": 1}]}"#).unwrap();
        assert!(!adapter.exists("data/time_entries.json").await.unwrap());

        handle.close().await.unwrap();
        assert_eq!(
            adapter.read("data/time_entries.json").await.unwrap(),
            json!({"entries": [{"id": 1}]})
        );
    }

    #[tokio::test]
    async fn test_read_handle_rejects_writes() {
        let (_, fs) = setup(Profile::Compat);
        let mut handle = fs.open("data/users.json", Mode::Read).await.unwrap();
        assert!(handle.write_all(b"{}").is_err());
    }

    #[tokio::test]
    async fn test_other_paths_use_real_files() {
        let (_, fs) = setup(Profile::Compat);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs.dump_json(&path, &json!({"debug_mode": true})).await.unwrap();
        assert!(path.exists());
        assert_eq!(fs.load_json(&path).await.unwrap(), json!({"debug_mode": true}));
    }

    #[tokio::test]
    async fn test_direct_profile_and_toggle() {
        let (adapter, fs) = setup(Profile::Direct);
        assert!(!fs.is_active());

        fs.activate();
        fs.activate();
        assert!(fs.is_active());
        fs.dump_json("data/admin_settings.json", &json!({"theme": "dark"})).await.unwrap();
        assert_eq!(adapter.read("data/admin_settings.json").await.unwrap(), json!({"theme": "dark"}));

        fs.deactivate();
        assert!(!fs.is_active());
        let res = fs.open("data/definitely-missing-dir/x.json", Mode::Read).await;
        assert!(matches!(res, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_invalid_json_on_close_is_an_error() {
        let (adapter, fs) = setup(Profile::Compat);
        let mut handle = fs.open("data/message.json", Mode::Write).await.unwrap();
        handle.write_all(b"not json").unwrap();
        assert!(matches!(handle.close().await, Err(Error::Serialization(_))));
        assert!(!adapter.exists("data/message.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_down_reads_default_and_close_fails() {
        let adapter = Arc::new(StorageAdapter::new(Arc::new(DownStore), "test"));
        let fs = VirtualFs::new(adapter, Profile::Compat);

        assert_eq!(fs.load_json("data/users.json").await.unwrap(), json!({"users": []}));

        let mut handle = fs.open("data/users.json", Mode::Write).await.unwrap();
        handle.write_all(br#"{"users": [{"id": 1}]}"#).unwrap();
        let res = handle.close().await;
        assert!(matches!(res, Err(Error::WriteFailed { path, .. }) if path == "data/users.json"));

        assert!(fs.dump_json("data/message.json", &json!({"message": "x"})).await.is_err());
    }
}
