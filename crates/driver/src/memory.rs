//! In-memory archive driver and host adapter.
//!
//! The container image is a JSON document with a format marker, an entry list
//! and inline data. This gives the federation core a complete, deterministic
//! collaborator for tests and demos without any real codec work. Nested
//! archives compose naturally: an inner archive's image is simply the byte
//! payload of one entry in the outer image.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use arcmount_model::{Entry, EntryPath, EntryType, Mtime, MountPoint};

use crate::container::{ByteSink, ByteSource, InputContainer, OutputContainer};
use crate::driver::ArchiveDriver;
use crate::error::DriverError;
use crate::host::HostFileSystem;

/// Format marker for in-memory container images.
const FORMAT: &str = "arcmem-v1";

/// Serialized container image.
#[derive(Debug, Serialize, Deserialize)]
struct Image {
    format: String,
    entries: Vec<ImageEntry>,
}

/// One serialized entry.
#[derive(Debug, Serialize, Deserialize)]
struct ImageEntry {
    path: String,
    dir: bool,
    mtime_micros: Option<i64>,
    #[serde(default)]
    data: Vec<u8>,
}

/// Convert a known mtime to microseconds since the Unix epoch.
fn mtime_to_micros(mtime: Mtime) -> Option<i64> {
    let time: SystemTime = mtime.time()?;
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => Some(d.as_micros() as i64),
        Err(e) => Some(-(e.duration().as_micros() as i64)),
    }
}

/// Convert microseconds since the Unix epoch back to an mtime.
fn micros_to_mtime(micros: Option<i64>) -> Mtime {
    match micros {
        Some(m) if m >= 0 => Mtime::Known(UNIX_EPOCH + Duration::from_micros(m as u64)),
        Some(m) => Mtime::Known(UNIX_EPOCH - Duration::from_micros((-m) as u64)),
        None => Mtime::Unknown,
    }
}

/// Input container over a decoded in-memory image.
pub struct MemoryInputContainer {
    entries: Vec<Entry>,
    data: HashMap<EntryPath, Vec<u8>>,
}

impl MemoryInputContainer {
    fn decode(mount_point: &MountPoint, bytes: &[u8]) -> Result<Self, DriverError> {
        let image: Image = serde_json::from_slice(bytes).map_err(|_| {
            DriverError::NotAnArchive {
                mount_point: mount_point.uri().to_string(),
            }
        })?;
        if image.format != FORMAT {
            return Err(DriverError::NotAnArchive {
                mount_point: mount_point.uri().to_string(),
            });
        }

        let mut entries: Vec<Entry> = Vec::with_capacity(image.entries.len());
        let mut data: HashMap<EntryPath, Vec<u8>> = HashMap::new();
        for raw in image.entries {
            let path: EntryPath = EntryPath::new(&raw.path).map_err(|_| {
                DriverError::Malformed {
                    mount_point: mount_point.uri().to_string(),
                    detail: format!("illegal entry path {:?}", raw.path),
                }
            })?;
            let kind: EntryType = if raw.dir {
                EntryType::Directory
            } else {
                EntryType::File
            };
            let entry: Entry = Entry::new(path.clone(), kind, micros_to_mtime(raw.mtime_micros))
                .with_size(raw.data.len() as u64);
            entries.push(entry);
            if !raw.dir {
                data.insert(path, raw.data);
            }
        }
        Ok(Self { entries, data })
    }
}

impl InputContainer for MemoryInputContainer {
    fn entries(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    fn contains(&self, path: &EntryPath) -> bool {
        self.entries.iter().any(|e| e.path() == path)
    }

    fn data(&self, path: &EntryPath) -> Result<Vec<u8>, DriverError> {
        self.data
            .get(path)
            .cloned()
            .ok_or_else(|| DriverError::NoSuchEntry {
                path: path.as_str().to_string(),
            })
    }
}

/// Output container assembling an in-memory image.
pub struct MemoryOutputContainer {
    sink: Box<dyn ByteSink>,
    entries: Vec<ImageEntry>,
    finished: bool,
}

impl OutputContainer for MemoryOutputContainer {
    fn put(&mut self, entry: &Entry, data: Option<&[u8]>) -> Result<(), DriverError> {
        self.entries.push(ImageEntry {
            path: entry.path().as_str().to_string(),
            dir: entry.is_directory(),
            mtime_micros: mtime_to_micros(entry.mtime()),
            data: data.map(<[u8]>::to_vec).unwrap_or_default(),
        });
        Ok(())
    }

    fn contains(&self, path: &EntryPath) -> bool {
        self.entries.iter().any(|e| e.path == path.as_str())
    }

    fn finish(&mut self) -> Result<(), DriverError> {
        debug_assert!(!self.finished, "output container finished twice");
        let image: Image = Image {
            format: FORMAT.to_string(),
            entries: std::mem::take(&mut self.entries),
        };
        let bytes: Vec<u8> = serde_json::to_vec(&image).map_err(|e| DriverError::Malformed {
            mount_point: String::new(),
            detail: e.to_string(),
        })?;
        self.sink.write(&bytes)?;
        self.finished = true;
        Ok(())
    }
}

/// Archive driver over the in-memory image format.
#[derive(Debug, Default)]
pub struct MemoryDriver;

impl MemoryDriver {
    /// Create the driver.
    pub fn new() -> Self {
        Self
    }

    /// Encode an image from `(path, is_dir, data)` triples, for test setup.
    pub fn encode_image(entries: &[(&str, bool, &[u8])]) -> Vec<u8> {
        let image: Image = Image {
            format: FORMAT.to_string(),
            entries: entries
                .iter()
                .map(|(path, dir, data)| ImageEntry {
                    path: (*path).to_string(),
                    dir: *dir,
                    mtime_micros: mtime_to_micros(Mtime::now()),
                    data: data.to_vec(),
                })
                .collect(),
        };
        serde_json::to_vec(&image).expect("image encoding cannot fail")
    }
}

impl ArchiveDriver for MemoryDriver {
    fn new_input_container(
        &self,
        mount_point: &MountPoint,
        source: &dyn ByteSource,
    ) -> Result<Box<dyn InputContainer>, DriverError> {
        let bytes: Vec<u8> = source.read()?;
        debug!(mount_point = %mount_point, len = bytes.len(), "decoding container image");
        let container: MemoryInputContainer = MemoryInputContainer::decode(mount_point, &bytes)?;
        Ok(Box::new(container))
    }

    fn new_output_container(
        &self,
        _mount_point: &MountPoint,
        sink: Box<dyn ByteSink>,
        _source: Option<&dyn InputContainer>,
    ) -> Result<Box<dyn OutputContainer>, DriverError> {
        Ok(Box::new(MemoryOutputContainer {
            sink,
            entries: Vec::new(),
            finished: false,
        }))
    }

    fn new_entry(&self, path: EntryPath, kind: EntryType, template: Option<&Entry>) -> Entry {
        let mtime: Mtime = match template {
            Some(t) if t.mtime().is_known() => t.mtime(),
            _ => Mtime::now(),
        };
        let size: u64 = template.map(Entry::size).unwrap_or(0);
        Entry::new(path, kind, mtime).with_size(size)
    }
}

/// Shared state of the in-memory host.
#[derive(Debug, Default)]
struct HostState {
    files: HashMap<String, Vec<u8>>,
    read_only: HashMap<String, bool>,
    /// Remaining injected transient failures per mount point.
    transient_failures: HashMap<String, u32>,
}

/// In-memory host file system adapter.
///
/// Stores archive file images in a map keyed by mount point URI. Supports
/// injecting transient failures so tests can exercise the
/// probe-without-caching path of the mount-state machine.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

/// Byte source reading the latest image lazily.
struct MemorySource {
    state: Arc<Mutex<HostState>>,
    uri: String,
}

impl ByteSource for MemorySource {
    fn read(&self) -> Result<Vec<u8>, DriverError> {
        self.state
            .lock()
            .files
            .get(&self.uri)
            .cloned()
            .ok_or_else(|| DriverError::NotFound {
                mount_point: self.uri.clone(),
            })
    }
}

/// Byte sink replacing the image on write.
struct MemorySink {
    state: Arc<Mutex<HostState>>,
    uri: String,
}

impl ByteSink for MemorySink {
    fn write(&self, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if *state.read_only.get(&self.uri).unwrap_or(&false) {
            return Err(DriverError::ReadOnlyTarget {
                mount_point: self.uri.clone(),
            });
        }
        state.files.insert(self.uri.clone(), data.to_vec());
        Ok(())
    }
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file image under a mount point URI.
    pub fn put_file(&self, uri: &str, data: Vec<u8>) {
        self.state.lock().files.insert(uri.to_string(), data);
    }

    /// Read back a stored file image.
    pub fn file(&self, uri: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(uri).cloned()
    }

    /// Mark a mount point read-only.
    pub fn set_read_only(&self, uri: &str, read_only: bool) {
        self.state
            .lock()
            .read_only
            .insert(uri.to_string(), read_only);
    }

    /// Make the next `count` source opens for a mount point fail with a
    /// transient `ConcurrentModification` error.
    pub fn inject_transient_failures(&self, uri: &str, count: u32) {
        self.state
            .lock()
            .transient_failures
            .insert(uri.to_string(), count);
    }
}

impl HostFileSystem for MemoryHost {
    fn source(&self, mount_point: &MountPoint) -> Result<Box<dyn ByteSource>, DriverError> {
        let uri: String = mount_point.uri().to_string();
        let mut state = self.state.lock();
        if let Some(remaining) = state.transient_failures.get_mut(&uri) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::ConcurrentModification { mount_point: uri });
            }
        }
        if !state.files.contains_key(&uri) {
            return Err(DriverError::NotFound { mount_point: uri });
        }
        Ok(Box::new(MemorySource {
            state: Arc::clone(&self.state),
            uri,
        }))
    }

    fn sink(&self, mount_point: &MountPoint) -> Result<Box<dyn ByteSink>, DriverError> {
        Ok(Box::new(MemorySink {
            state: Arc::clone(&self.state),
            uri: mount_point.uri().to_string(),
        }))
    }

    fn exists(&self, mount_point: &MountPoint) -> bool {
        self.state.lock().files.contains_key(mount_point.uri())
    }

    fn is_writable(&self, mount_point: &MountPoint) -> bool {
        !*self
            .state
            .lock()
            .read_only
            .get(mount_point.uri())
            .unwrap_or(&false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_round_trip() {
        let bytes: Vec<u8> =
            MemoryDriver::encode_image(&[("a", true, b""), ("a/b.txt", false, b"hello")]);
        let mp: MountPoint = MountPoint::rooted("mem:/t.zip").unwrap();
        let container: MemoryInputContainer =
            MemoryInputContainer::decode(&mp, &bytes).unwrap();

        let entries: Vec<Entry> = container.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_directory());
        assert_eq!(entries[1].size(), 5);
        assert_eq!(
            container
                .data(&EntryPath::new("a/b.txt").unwrap())
                .unwrap(),
            b"hello"
        );
    }

    #[test]
    fn test_decode_rejects_non_archive_bytes() {
        let mp: MountPoint = MountPoint::rooted("mem:/t.zip").unwrap();
        let err = MemoryInputContainer::decode(&mp, b"plain text, not an image");
        assert!(matches!(err, Err(DriverError::NotAnArchive { .. })));
        let err = MemoryInputContainer::decode(&mp, br#"{"format":"other","entries":[]}"#);
        assert!(matches!(err, Err(DriverError::NotAnArchive { .. })));
    }

    #[test]
    fn test_host_source_missing_file() {
        let host: MemoryHost = MemoryHost::new();
        let mp: MountPoint = MountPoint::rooted("mem:/absent.zip").unwrap();
        assert!(!host.exists(&mp));
        assert!(matches!(
            host.source(&mp),
            Err(DriverError::NotFound { .. })
        ));
    }

    #[test]
    fn test_host_transient_failure_injection() {
        let host: MemoryHost = MemoryHost::new();
        let mp: MountPoint = MountPoint::rooted("mem:/t.zip").unwrap();
        host.put_file(mp.uri(), MemoryDriver::encode_image(&[]));
        host.inject_transient_failures(mp.uri(), 1);

        let err = host.source(&mp);
        assert!(matches!(
            err,
            Err(DriverError::ConcurrentModification { .. })
        ));
        // Second probe succeeds: the condition resolved itself.
        assert!(host.source(&mp).is_ok());
    }

    #[test]
    fn test_sink_respects_read_only() {
        let host: MemoryHost = MemoryHost::new();
        let mp: MountPoint = MountPoint::rooted("mem:/ro.zip").unwrap();
        host.set_read_only(mp.uri(), true);
        assert!(!host.is_writable(&mp));

        let sink = host.sink(&mp).unwrap();
        assert!(matches!(
            sink.write(b"x"),
            Err(DriverError::ReadOnlyTarget { .. })
        ));
    }

    #[test]
    fn test_output_container_writes_on_finish_only() {
        let host: MemoryHost = MemoryHost::new();
        let mp: MountPoint = MountPoint::rooted("mem:/o.zip").unwrap();
        let driver: MemoryDriver = MemoryDriver::new();

        let sink = host.sink(&mp).unwrap();
        let mut out = driver.new_output_container(&mp, sink, None).unwrap();
        let entry: Entry = driver.new_entry(EntryPath::new("f").unwrap(), EntryType::File, None);
        out.put(&entry, Some(b"data")).unwrap();
        assert!(out.contains(&EntryPath::new("f").unwrap()));
        assert!(host.file(mp.uri()).is_none());

        out.finish().unwrap();
        let image: Vec<u8> = host.file(mp.uri()).unwrap();
        let decoded: MemoryInputContainer =
            MemoryInputContainer::decode(&mp, &image).unwrap();
        assert_eq!(decoded.data(&EntryPath::new("f").unwrap()).unwrap(), b"data");
    }
}
