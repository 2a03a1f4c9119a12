use bytes::Bytes;
use s3nap::cadapter::client::ObjectClient;
use s3nap::cadapter::localfs::LocalFsBackend;
use s3nap::cadapter::memory::MemoryBackend;
use s3nap::commands::list::{format_entry, write_inventory};
use s3nap::transfer::TransferPool;
use s3nap::{ChunkedStore, S3napError};

fn memory_store() -> ChunkedStore<MemoryBackend> {
    ChunkedStore::new(
        ObjectClient::new(MemoryBackend::with_page_size(2)),
        TransferPool::current(2),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_thirty_byte_stream_inventory() {
    let store = memory_store();
    let data: Vec<u8> = (0..30).collect();
    let receipts = store.upload(&data[..], "thirty", 10).await.unwrap();
    assert_eq!(receipts.len(), 3);

    let entries = store.inventory("").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "thirty");
    assert_eq!(entries[0].chunk_count, 3);
    assert_eq!(entries[0].total_size, 30);

    let line = format_entry("bkt", &entries[0]);
    let fields: Vec<&str> = line.split('\t').collect();
    assert_eq!(fields[..4], ["bkt", "thirty", "3", "30"]);
    assert!(fields[4].ends_with('Z'));
}

#[tokio::test]
async fn test_interleaved_names_and_malformed_keys() {
    let store = memory_store();
    let backend = store.client().backend();
    for (key, body) in [
        ("a:000001", "22"),
        ("b:000000", "x"),
        ("a:000000", "1"),
        ("a:000002", "333"),
        ("b:000001", "yy"),
        ("noindex", "?"),
        ("two:colons:000001", "?"),
    ] {
        backend.insert_raw(key, Bytes::from(body));
    }

    let entries = store.inventory("").await.unwrap();
    let summary: Vec<(&str, usize, u64)> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.chunk_count, e.total_size))
        .collect();
    assert_eq!(summary, [("a", 3, 6), ("b", 2, 3)]);

    let mut out = Vec::new();
    store.download("a", &mut out).await.unwrap();
    assert_eq!(out, b"122333");

    let mut report = Vec::new();
    write_inventory("bkt", &entries, &mut report).await.unwrap();
    assert_eq!(String::from_utf8(report).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn test_chunk_rewritten_on_disk_fails_verification() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ChunkedStore::new(
        ObjectClient::new(LocalFsBackend::new(tmp.path())),
        TransferPool::current(2),
    );
    store.upload(&b"aaaabbbb"[..], "x", 4).await.unwrap();
    std::fs::write(tmp.path().join("x:000001"), b"ZZZZ").unwrap();

    let mut out = Vec::new();
    let err = store.download("x", &mut out).await.unwrap_err();
    assert!(matches!(err, S3napError::IntegrityMismatch { index: 1, .. }));
    assert_eq!(out, b"aaaa");
}

#[tokio::test]
async fn test_delete_removes_exactly_the_prefix() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ChunkedStore::new(
        ObjectClient::new(LocalFsBackend::new(tmp.path()).with_page_size(3)),
        TransferPool::current(2),
    );
    store.upload(&[5u8; 35][..], "logs", 5).await.unwrap();
    store.upload(&[6u8; 10][..], "logs-old", 5).await.unwrap();

    assert_eq!(store.delete_prefix("logs:").await.unwrap(), 7);
    let left = store.inventory("").await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "logs-old");

    let mut out = Vec::new();
    let err = store.download("logs", &mut out).await.unwrap_err();
    assert!(matches!(err, S3napError::NotFound(ref name) if name == "logs"));
}
