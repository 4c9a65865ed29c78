//! Blob transfer tests against the mock server.
//!
//! Covers reading, writing, cancelling and seeking blobs through the
//! client's blob handles, and the blob lifecycle at transaction end.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use bytes::Bytes;
use fb_client::{Blob, BlobId, BlobParameterBuffer, BlobState, BlobType, Database, Error, SeekMode, Transaction};
use fb_wire::MAX_SEGMENT_SIZE;
use fb_wire::codes::ISC_BAD_SEGSTR_ID;
use proptest::prelude::*;

use common::{attached, transaction};

/// Write `data` as one output blob, one segment per cut, and return its id.
async fn write_cut(db: &Database, tx: &Transaction, data: &[u8], cuts: &[usize]) -> BlobId {
    let output = db.create_blob_for_output(tx, None).unwrap();
    output.open().await.unwrap();
    let mut start = 0;
    for &end in cuts.iter().chain(std::iter::once(&data.len())) {
        if end > start {
            output.put_segment(&data[start..end]).await.unwrap();
            start = end;
        }
    }
    output.close().await.unwrap();
    output.blob_id().unwrap()
}

async fn read_back(db: &Database, tx: &Transaction, id: BlobId) -> Vec<u8> {
    let input = db.create_blob_for_input(tx, id, None).unwrap();
    input.open().await.unwrap();
    let data = input.read_to_end().await.unwrap();
    input.close().await.unwrap();
    data.to_vec()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// =============================================================================
// Input Blobs
// =============================================================================

#[tokio::test]
async fn test_input_blob_reread_is_idempotent() {
    let (server, db) = attached().await;
    let id = server.insert_blob([&b"hello "[..], &b"segmented "[..], &b"world"[..]], BlobType::Segmented);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();
    let first = blob.read_to_end().await.unwrap();
    assert!(blob.is_eof());
    blob.close().await.unwrap();
    assert_eq!(blob.state(), BlobState::Closed);

    blob.open().await.unwrap();
    assert!(!blob.is_eof());
    let second = blob.read_to_end().await.unwrap();
    blob.close().await.unwrap();

    assert_eq!(&first[..], b"hello segmented world");
    assert_eq!(first, second);
    tx.commit().await.unwrap();
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_double_open_fails() {
    let (server, db) = attached().await;
    let id = server.insert_blob([b"x"], BlobType::Segmented);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();
    assert!(matches!(blob.open().await, Err(Error::AlreadyOpen)));

    let output = db.create_blob_for_output(&tx, None).unwrap();
    output.open().await.unwrap();
    assert!(matches!(output.open().await, Err(Error::AlreadyOpen)));
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_small_reads_split_segments() {
    let (server, db) = attached().await;
    let id = server.insert_blob([b"abcdefghij"], BlobType::Segmented);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();
    let mut data = Vec::new();
    while !blob.is_eof() {
        let segment = blob.get_segment(4).await.unwrap();
        assert!(segment.len() <= 4);
        data.extend_from_slice(&segment);
    }
    assert_eq!(&data[..], b"abcdefghij");
    assert!(matches!(blob.get_segment(0).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(blob.put_segment(b"no").await, Err(Error::WriteNotSupported)));
    assert!(matches!(blob.cancel().await, Err(Error::FeatureNotSupported(_))));
}

#[tokio::test]
async fn test_read_before_open() {
    let (server, db) = attached().await;
    let id = server.insert_blob([b"x"], BlobType::Segmented);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    assert!(matches!(blob.get_segment(10).await, Err(Error::NotOpen)));
    assert!(matches!(blob.close().await, Err(Error::NotOpen)));
}

#[tokio::test]
async fn test_blob_length() {
    let (server, db) = attached().await;
    let id = server.insert_blob([vec![7u8; 1000], vec![8u8; 24]], BlobType::Segmented);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();
    assert_eq!(blob.length().await.unwrap(), 1024);
}

// =============================================================================
// Output Blobs
// =============================================================================

#[tokio::test]
async fn test_output_round_trip_segment_sizes() {
    let (server, db) = attached().await;
    let tx = transaction(&db).await;

    for size in [1, 2, 255, 4096, MAX_SEGMENT_SIZE - 1, MAX_SEGMENT_SIZE] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

        let output = db.create_blob_for_output(&tx, None).unwrap();
        output.open().await.unwrap();
        output.put_segment(&data).await.unwrap();
        output.close().await.unwrap();
        let id = output.blob_id().expect("closed output blob keeps its id");

        assert_eq!(server.blob_segments(id).unwrap(), vec![Bytes::from(data.clone())]);

        let input = db.create_blob_for_input(&tx, id, None).unwrap();
        input.open().await.unwrap();
        assert_eq!(input.read_to_end().await.unwrap(), data, "size {size}");
        input.close().await.unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_segment_size_limits() {
    let (_server, db) = attached().await;
    let tx = transaction(&db).await;

    let output = db.create_blob_for_output(&tx, None).unwrap();
    output.open().await.unwrap();
    assert!(matches!(output.put_segment(&[]).await, Err(Error::InvalidArgument(_))));
    let oversized = vec![0u8; MAX_SEGMENT_SIZE + 1];
    assert!(matches!(output.put_segment(&oversized).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(output.get_segment(10).await, Err(Error::ReadNotSupported)));
    assert!(matches!(output.seek(0, SeekMode::Absolute).await, Err(Error::FeatureNotSupported(_))));
}

#[tokio::test]
async fn test_write_all_splits_segments() {
    let (server, db) = attached().await;
    let tx = transaction(&db).await;
    let data = vec![42u8; MAX_SEGMENT_SIZE * 2 + 10];

    let output = db.create_blob_for_output(&tx, None).unwrap();
    output.open().await.unwrap();
    output.write_all(&data).await.unwrap();
    output.close().await.unwrap();

    let id = output.blob_id().unwrap();
    let lengths: Vec<usize> = server.blob_segments(id).unwrap().iter().map(Bytes::len).collect();
    assert_eq!(lengths, vec![MAX_SEGMENT_SIZE, MAX_SEGMENT_SIZE, 10]);
    assert_eq!(server.blob_contents(id).unwrap(), data);
}

#[tokio::test]
async fn test_chunking_does_not_change_contents() {
    let (server, db) = attached().await;
    let tx = transaction(&db).await;
    let data = payload(MAX_SEGMENT_SIZE * 2 + 1234);

    // The first 4096 bytes go out one at a time, the rest in full segments.
    let single_bytes: Vec<usize> = (1..4096)
        .chain((4096 + MAX_SEGMENT_SIZE..data.len()).step_by(MAX_SEGMENT_SIZE))
        .collect();
    let full_segments: Vec<usize> = (MAX_SEGMENT_SIZE..data.len()).step_by(MAX_SEGMENT_SIZE).collect();
    let ragged = [1, 2, 700, 701, 33_000, MAX_SEGMENT_SIZE + 33_000, data.len() - 1];

    let cuts: [&[usize]; 3] = [&single_bytes, &full_segments, &ragged];
    for cut in cuts {
        let id = write_cut(&db, &tx, &data, cut).await;
        assert_eq!(server.blob_contents(id).unwrap(), data);
        assert_eq!(read_back(&db, &tx, id).await, data, "cuts {:?}", &cut[..cut.len().min(8)]);
    }

    let id = write_cut(&db, &tx, &data, &full_segments).await;
    let lengths: Vec<usize> = server.blob_segments(id).unwrap().iter().map(Bytes::len).collect();
    assert_eq!(lengths, vec![MAX_SEGMENT_SIZE, MAX_SEGMENT_SIZE, 1234]);
    tx.commit().await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_random_cuts_read_back_identical(
        len in 1usize..=(MAX_SEGMENT_SIZE + 2000),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12),
    ) {
        let data = payload(len);
        let mut cuts: Vec<usize> = cuts.iter().map(|c| c.index(len)).collect();
        cuts.sort_unstable();
        // No segment may exceed the protocol maximum.
        let mut bounded = Vec::new();
        let mut start = 0;
        for end in cuts.into_iter().chain(std::iter::once(len)) {
            while end - start > MAX_SEGMENT_SIZE {
                start += MAX_SEGMENT_SIZE;
                bounded.push(start);
            }
            if end > start {
                bounded.push(end);
                start = end;
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let read = runtime.block_on(async {
            let (server, db) = attached().await;
            let tx = transaction(&db).await;
            let id = write_cut(&db, &tx, &data, &bounded).await;
            let segments = server.blob_segments(id).unwrap();
            assert!(segments.iter().all(|s| !s.is_empty() && s.len() <= MAX_SEGMENT_SIZE));
            let read = read_back(&db, &tx, id).await;
            tx.commit().await.unwrap();
            db.close().await.unwrap();
            read
        });
        prop_assert_eq!(read, data);
    }
}

#[tokio::test]
async fn test_cancelled_blob_id_rejected() {
    let (server, db) = attached().await;
    let tx = transaction(&db).await;

    let output = db.create_blob_for_output(&tx, None).unwrap();
    output.open().await.unwrap();
    let id = output.blob_id().unwrap();
    output.put_segment(b"discarded").await.unwrap();
    output.cancel().await.unwrap();

    assert_eq!(output.state(), BlobState::Cancelled);
    assert!(output.is_eof());
    assert_eq!(output.blob_id(), None);
    assert!(server.blob_contents(id).is_none());
    assert!(matches!(output.open().await, Err(Error::ReopenNotAllowed)));

    let input = db.create_blob_for_input(&tx, id, None).unwrap();
    let err = input.open().await.unwrap_err();
    assert!(err.is_server_error(ISC_BAD_SEGSTR_ID), "unexpected error: {err}");
}

#[tokio::test]
async fn test_open_blob_closed_at_commit() {
    let (server, db) = attached().await;
    let tx = transaction(&db).await;

    let output = db.create_blob_for_output(&tx, None).unwrap();
    output.open().await.unwrap();
    output.put_segment(b"kept").await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(output.state(), BlobState::Closed);
    let id = output.blob_id().unwrap();
    assert_eq!(&server.blob_contents(id).unwrap()[..], b"kept");
    assert!(matches!(output.put_segment(b"late").await, Err(Error::TransactionNotActive)));
}

// =============================================================================
// Seeking
// =============================================================================

#[tokio::test]
async fn test_seek_on_segmented_blob_fails() {
    let (server, db) = attached().await;
    let id = server.insert_blob([b"abc"], BlobType::Segmented);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();
    let err = blob.seek(1, SeekMode::Absolute).await.unwrap_err();
    let Error::SegmentedBlobNotSeekable(server_error) = err else {
        panic!("expected SegmentedBlobNotSeekable, got {err:?}");
    };
    assert_eq!(server_error.code(), fb_wire::codes::ISC_BAD_SEGSTR_TYPE);

    // The blob stays usable.
    assert_eq!(&blob.read_to_end().await.unwrap()[..], b"abc");
}

#[tokio::test]
async fn test_seek_on_stream_blob() {
    let (server, db) = attached().await;
    let id = server.insert_blob([&b"0123"[..], &b"456789"[..]], BlobType::Stream);
    let tx = transaction(&db).await;

    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();
    assert_eq!(blob.seek(6, SeekMode::Absolute).await.unwrap(), 6);
    assert_eq!(blob.seek(-2, SeekMode::Relative).await.unwrap(), 4);
    assert_eq!(&blob.get_segment(3).await.unwrap()[..], b"456");
    assert_eq!(blob.seek(-1, SeekMode::FromEnd).await.unwrap(), 9);
    assert_eq!(&blob.read_to_end().await.unwrap()[..], b"9");
}

#[tokio::test]
async fn test_stream_blob_written_and_read() {
    let (server, db) = attached().await;
    let tx = transaction(&db).await;

    let bpb = BlobParameterBuffer::new().with_type(BlobType::Stream);
    let output = db.create_blob_for_output(&tx, Some(bpb)).unwrap();
    output.open().await.unwrap();
    output.put_segment(b"stream ").await.unwrap();
    output.put_segment(b"data").await.unwrap();
    output.close().await.unwrap();
    let id = output.blob_id().unwrap();
    assert_eq!(server.blob_segments(id).unwrap().len(), 1);

    let input = db.create_blob_for_input(&tx, id, None).unwrap();
    input.open().await.unwrap();
    assert_eq!(input.seek(7, SeekMode::Absolute).await.unwrap(), 7);
    assert_eq!(&input.read_to_end().await.unwrap()[..], b"data");
}

// =============================================================================
// Session State
// =============================================================================

#[tokio::test]
async fn test_blob_after_detach() {
    let (server, db) = attached().await;
    let id = server.insert_blob([b"x"], BlobType::Segmented);
    let tx = transaction(&db).await;
    let blob = db.create_blob_for_input(&tx, id, None).unwrap();
    blob.open().await.unwrap();

    tx.commit().await.unwrap();
    db.close().await.unwrap();

    assert_eq!(blob.state(), BlobState::Closed);
    assert!(matches!(blob.open().await, Err(Error::NotAttached)));
}
