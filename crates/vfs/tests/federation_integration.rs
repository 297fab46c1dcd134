//! Integration tests for the federation facade.
//!
//! Tests drive the full controller chain over the in-memory driver and host
//! adapter, covering the write-read-sync-reopen round trip, false-positive
//! rerouting, mount failure classes, and stream handling.

use std::io::{Read, Write};
use std::sync::Arc;

use arcmount_driver::{MemoryDriver, MemoryHost};
use arcmount_model::{EntryPath, EntryType, Mtime, StructuralError};
use arcmount_vfs::{Federation, FsError, SyncOptions};

// ============================================================================
// Test Infrastructure
// ============================================================================

/// Build a federation over a fresh in-memory host.
fn federation() -> (Federation, MemoryHost) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let host: MemoryHost = MemoryHost::new();
    let fed: Federation = Federation::new(
        Arc::new(MemoryDriver::new()),
        Arc::new(host.clone()),
    );
    (fed, host)
}

/// Build a second federation sharing the same host, with an empty registry.
fn reopen(host: &MemoryHost) -> Federation {
    Federation::new(Arc::new(MemoryDriver::new()), Arc::new(host.clone()))
}

fn path(s: &str) -> EntryPath {
    EntryPath::new(s).unwrap()
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[test]
fn test_write_read_sync_reopen_round_trip() {
    let (fed, host) = federation();
    let mp = arcmount_model::MountPoint::rooted("mem:/fresh.arc").unwrap();

    // Write into an archive that does not exist yet; the mount is
    // auto-created.
    fed.write(&mp, &path("a/b.txt"), vec![1, 2, 3]).unwrap();

    // Visible unsynced, straight from memory.
    assert_eq!(*fed.read(&mp, &path("a/b.txt")).unwrap(), vec![1, 2, 3]);
    assert!(fed.is_directory(&mp, &path("a")).unwrap());
    assert_eq!(fed.length(&mp, &path("a/b.txt")).unwrap(), 3);
    assert_eq!(fed.list(&mp, &EntryPath::root()).unwrap(), vec!["a"]);

    // Nothing on the host before sync.
    assert!(host.file("mem:/fresh.arc/").is_none());

    let report = fed.sync_all(&SyncOptions::umount()).unwrap();
    assert!(!report.has_failures());
    assert!(host.file("mem:/fresh.arc/").is_some());

    // A fresh federation re-mounts from the persisted bytes.
    let fed2 = reopen(&host);
    assert_eq!(*fed2.read(&mp, &path("a/b.txt")).unwrap(), vec![1, 2, 3]);
    assert_eq!(fed2.list(&mp, &path("a")).unwrap(), vec!["b.txt"]);
}

#[test]
fn test_mount_existing_archive() {
    let (fed, host) = federation();
    let image: Vec<u8> = MemoryDriver::encode_image(&[
        ("docs", true, b""),
        ("docs/readme.txt", false, b"hello"),
    ]);
    host.put_file("mem:/a.arc/", image);

    let mp = arcmount_model::MountPoint::rooted("mem:/a.arc").unwrap();
    assert!(fed.exists(&mp, &path("docs/readme.txt")).unwrap());
    assert!(fed.is_file(&mp, &path("docs/readme.txt")).unwrap());
    assert_eq!(*fed.read(&mp, &path("docs/readme.txt")).unwrap(), b"hello");
    assert_eq!(fed.list(&mp, &EntryPath::root()).unwrap(), vec!["docs"]);
}

// ============================================================================
// False positives
// ============================================================================

#[test]
fn test_false_positive_reroutes_to_enclosing_archive() {
    let (fed, host) = federation();
    let image: Vec<u8> =
        MemoryDriver::encode_image(&[("notes.txt", false, b"plain text, not an archive")]);
    host.put_file("mem:/outer.arc/", image);

    let outer = arcmount_model::MountPoint::rooted("mem:/outer.arc").unwrap();
    // Address notes.txt as if it were an archive.
    let inner = arcmount_model::MountPoint::nested(&outer, path("notes.txt")).unwrap();

    // The mount fails, and the operation degrades to the plain entry of the
    // enclosing archive.
    let stat = fed.stat(&inner, &EntryPath::root()).unwrap().unwrap();
    assert_eq!(stat.kind, EntryType::File);
    assert_eq!(
        *fed.read(&inner, &EntryPath::root()).unwrap(),
        b"plain text, not an archive"
    );

    // A member path of the false positive does not exist in the enclosing
    // archive either.
    assert!(!fed.exists(&inner, &path("member")).unwrap());
}

#[test]
fn test_rooted_false_positive_surfaces_not_mountable() {
    let (fed, host) = federation();
    host.put_file("mem:/junk.arc/", b"definitely not an image".to_vec());

    let mp = arcmount_model::MountPoint::rooted("mem:/junk.arc").unwrap();
    let err = fed.read(&mp, &path("x")).unwrap_err();
    assert!(matches!(err, FsError::NotMountable { .. }));

    // exists() answers rather than failing.
    assert!(!fed.exists(&mp, &path("x")).unwrap());
}

#[test]
fn test_missing_rooted_archive_is_not_mountable_for_reads() {
    let (fed, _host) = federation();
    let mp = arcmount_model::MountPoint::rooted("mem:/absent.arc").unwrap();
    assert!(!fed.exists(&mp, &path("x")).unwrap());
    assert!(matches!(
        fed.list(&mp, &EntryPath::root()),
        Err(FsError::NotMountable { .. })
    ));
}

#[test]
fn test_transient_mount_failure_is_reprobed() {
    let (fed, host) = federation();
    host.put_file(
        "mem:/busy.arc/",
        MemoryDriver::encode_image(&[("f.txt", false, b"x")]),
    );
    host.inject_transient_failures("mem:/busy.arc/", 1);

    let mp = arcmount_model::MountPoint::rooted("mem:/busy.arc").unwrap();

    // First probe hits the injected failure; not cached.
    assert!(fed.stat(&mp, &path("f.txt")).is_err());
    // Second probe mounts.
    assert!(fed.exists(&mp, &path("f.txt")).unwrap());
}

// ============================================================================
// Structural operations
// ============================================================================

#[test]
fn test_mkdir_create_file_delete() {
    let (fed, _host) = federation();
    let mp = arcmount_model::MountPoint::rooted("mem:/t.arc").unwrap();

    fed.mkdir(&mp, &path("a/b"), true).unwrap();
    fed.create_file(&mp, &path("a/b/c.txt")).unwrap();
    assert!(fed.is_file(&mp, &path("a/b/c.txt")).unwrap());
    assert_eq!(fed.length(&mp, &path("a/b/c.txt")).unwrap(), 0);

    // Non-empty directory refuses deletion.
    assert!(matches!(
        fed.delete(&mp, &path("a/b")),
        Err(FsError::Structural(StructuralError::DirectoryNotEmpty { .. }))
    ));

    fed.delete(&mp, &path("a/b/c.txt")).unwrap();
    fed.delete(&mp, &path("a/b")).unwrap();
    assert!(!fed.exists(&mp, &path("a/b")).unwrap());

    // Create without parents requires the parent to exist.
    assert!(matches!(
        fed.create_file(&mp, &path("missing/d.txt")),
        Err(FsError::Structural(StructuralError::MissingParent { .. }))
    ));
}

#[test]
fn test_set_last_modified() {
    let (fed, _host) = federation();
    let mp = arcmount_model::MountPoint::rooted("mem:/t.arc").unwrap();

    fed.write(&mp, &path("f.txt"), b"x".to_vec()).unwrap();
    let stamp: Mtime = Mtime::now();
    fed.set_last_modified(&mp, &path("f.txt"), stamp).unwrap();
    assert_eq!(fed.last_modified(&mp, &path("f.txt")).unwrap(), stamp);
}

#[test]
fn test_read_only_host_rejects_mutation() {
    let (fed, host) = federation();
    host.put_file(
        "mem:/ro.arc/",
        MemoryDriver::encode_image(&[("f.txt", false, b"x")]),
    );
    host.set_read_only("mem:/ro.arc/", true);

    let mp = arcmount_model::MountPoint::rooted("mem:/ro.arc").unwrap();
    assert_eq!(*fed.read(&mp, &path("f.txt")).unwrap(), b"x");
    assert!(matches!(
        fed.delete(&mp, &path("f.txt")),
        Err(FsError::Structural(StructuralError::ReadOnly))
    ));
}

// ============================================================================
// Streams
// ============================================================================

#[test]
fn test_input_stream_reads_snapshot() {
    let (fed, host) = federation();
    host.put_file(
        "mem:/s.arc/",
        MemoryDriver::encode_image(&[("f.txt", false, b"stream me")]),
    );
    let mp = arcmount_model::MountPoint::rooted("mem:/s.arc").unwrap();

    let mut stream = fed.new_input_stream(&mp, &path("f.txt")).unwrap();
    let mut buf: Vec<u8> = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"stream me");
}

#[test]
fn test_output_stream_commits_on_close() {
    let (fed, _host) = federation();
    let mp = arcmount_model::MountPoint::rooted("mem:/s.arc").unwrap();

    let mut stream = fed.new_output_stream(&mp, &path("f.txt")).unwrap();
    stream.write_all(b"committed").unwrap();
    stream.close().unwrap();
    assert_eq!(*fed.read(&mp, &path("f.txt")).unwrap(), b"committed");
}

#[test]
fn test_output_stream_dropped_without_close_discards() {
    let (fed, _host) = federation();
    let mp = arcmount_model::MountPoint::rooted("mem:/s.arc").unwrap();

    {
        let mut stream = fed.new_output_stream(&mp, &path("f.txt")).unwrap();
        stream.write_all(b"lost").unwrap();
    }
    assert!(!fed.exists(&mp, &path("f.txt")).unwrap());
}
