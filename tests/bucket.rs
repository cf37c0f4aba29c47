use anyhow::Result;
use colshard::bucket::{Bucket, BucketOptions};
use colshard::io::compression::{CompressionCodec, codec_by_name, codec_names};
use colshard::retry::RetryConfig;
use colshard::{DType, Error, FieldSpec, Record, Schema, Value, read_column};
use std::path::Path;
use std::sync::Arc;

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(
            vec![
                FieldSpec::new("Enrolid", "ENROLID", DType::U64),
                FieldSpec::new("Dstatus", "DSTATUS", DType::U8),
                FieldSpec::new("Dx1", "DX1", DType::Text),
            ],
            "Enrolid",
        )
        .unwrap(),
    )
}

fn record(id: u64) -> Record {
    Record {
        subject_id: id,
        values: vec![
            Value::U64(id),
            Value::U8((id % 3) as u8),
            Value::Text(format!("D{id}")),
        ],
    }
}

fn bucket(dir: &Path, codec: Arc<dyn CompressionCodec>, flush_threshold: usize) -> Result<Bucket> {
    Ok(Bucket::create(
        0,
        dir.join("0000"),
        schema(),
        codec,
        BucketOptions {
            flush_threshold,
            retry: RetryConfig::none(),
        },
    )?)
}

fn file_len(b: &Bucket, field: &str) -> Result<u64> {
    Ok(std::fs::metadata(b.column_file(field))?.len())
}

#[test]
fn create_writes_dtypes_and_empty_columns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let b = bucket(dir.path(), codec_by_name("snappy")?, 100)?;
    for field in ["Enrolid", "Dstatus", "Dx1"] {
        assert_eq!(file_len(&b, field)?, 0);
    }
    let dtypes: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(b.dir().join("dtypes.json"))?)?;
    assert_eq!(dtypes["Dstatus"], "uint8");
    assert_eq!(dtypes["Dx1"], "string");
    Ok(())
}

#[test]
fn flushing_an_empty_buffer_changes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let b = bucket(dir.path(), codec_by_name("snappy")?, 100)?;
    b.add(record(5))?;
    assert_eq!(b.flush()?, 1);
    let before = file_len(&b, "Dx1")?;
    assert!(before > 0);

    assert_eq!(b.flush()?, 0);
    assert_eq!(b.flush()?, 0);
    assert_eq!(file_len(&b, "Dx1")?, before);
    assert_eq!(b.flushes(), 1);
    assert_eq!(b.rows_written(), 1);
    Ok(())
}

#[test]
fn add_flushes_once_past_threshold() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let b = bucket(dir.path(), codec_by_name("snappy")?, 2)?;
    b.add(record(1))?;
    b.add(record(2))?;
    assert_eq!(b.buffered_rows(), 2);
    assert_eq!(b.flushes(), 0);

    b.add(record(3))?;
    assert_eq!(b.buffered_rows(), 0);
    assert_eq!(b.flushes(), 1);
    assert_eq!(b.rows_written(), 3);
    Ok(())
}

#[test]
fn mismatched_record_leaves_columns_aligned() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let b = bucket(dir.path(), codec_by_name("snappy")?, 100)?;
    let mut bad = record(1);
    bad.values[1] = Value::U32(1);
    assert!(matches!(b.add(bad), Err(Error::Decode { .. })));
    let mut short = record(2);
    short.values.pop();
    assert!(b.add(short).is_err());
    assert_eq!(b.buffered_rows(), 0);

    b.add(record(3))?;
    assert_eq!(b.flush()?, 1);
    Ok(())
}

#[test]
fn appended_blocks_read_back_as_one_stream_for_every_codec() -> Result<()> {
    for name in codec_names() {
        let dir = tempfile::tempdir()?;
        let codec = codec_by_name(&name)?;
        let b = bucket(dir.path(), Arc::clone(&codec), 1000)?;
        b.add(record(10))?;
        b.add(record(11))?;
        b.flush()?;
        b.add(record(12))?;
        b.flush()?;

        let ids = read_column(b.dir(), "Enrolid", DType::U64, 0, 10, None, codec.as_ref())?;
        assert_eq!(
            ids,
            vec![Value::U64(10), Value::U64(11), Value::U64(12)],
            "codec {name}"
        );
        let dx = read_column(b.dir(), "Dx1", DType::Text, 2, 10, None, codec.as_ref())?;
        assert_eq!(dx, vec![Value::Text("D12".into())], "codec {name}");
    }
    Ok(())
}

#[test]
fn bucket_without_rows_reads_back_empty_for_every_codec() -> Result<()> {
    for name in codec_names() {
        let dir = tempfile::tempdir()?;
        let codec = codec_by_name(&name)?;
        let b = bucket(dir.path(), Arc::clone(&codec), 1000)?;
        assert_eq!(b.flush()?, 0);

        for (field, dtype) in [("Enrolid", DType::U64), ("Dstatus", DType::U8), ("Dx1", DType::Text)] {
            let got = read_column(b.dir(), field, dtype, 0, 10, None, codec.as_ref())?;
            assert!(got.is_empty(), "codec {name} field {field}");
            let past_end = read_column(b.dir(), field, dtype, 3, 10, None, codec.as_ref())?;
            assert!(past_end.is_empty(), "codec {name} field {field}");
        }
    }
    Ok(())
}

#[test]
fn concurrent_adds_and_flushes_keep_columns_aligned() -> Result<()> {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 250;

    let dir = tempfile::tempdir()?;
    let codec = codec_by_name("snappy")?;
    let b = bucket(dir.path(), Arc::clone(&codec), 7)?;
    let done = std::sync::atomic::AtomicBool::new(false);

    std::thread::scope(|s| -> Result<()> {
        let flusher = s.spawn(|| -> colshard::Result<()> {
            while !done.load(std::sync::atomic::Ordering::Acquire) {
                b.flush()?;
            }
            Ok(())
        });
        let adders: Vec<_> = (0..THREADS)
            .map(|t| {
                let b = &b;
                s.spawn(move || -> colshard::Result<()> {
                    for i in 0..PER_THREAD {
                        b.add(record(t * PER_THREAD + i))?;
                    }
                    Ok(())
                })
            })
            .collect();
        for a in adders {
            a.join().expect("adder panicked")?;
        }
        done.store(true, std::sync::atomic::Ordering::Release);
        flusher.join().expect("flusher panicked")?;
        Ok(())
    })?;
    b.flush()?;

    let total = THREADS * PER_THREAD;
    assert_eq!(b.rows_written(), total);
    assert_eq!(b.buffered_rows(), 0);

    let ids = read_column(b.dir(), "Enrolid", DType::U64, 0, usize::MAX, None, codec.as_ref())?;
    let status = read_column(b.dir(), "Dstatus", DType::U8, 0, usize::MAX, None, codec.as_ref())?;
    let dx = read_column(b.dir(), "Dx1", DType::Text, 0, usize::MAX, None, codec.as_ref())?;
    assert_eq!(ids.len() as u64, total);
    assert_eq!(status.len(), ids.len());
    assert_eq!(dx.len(), ids.len());

    // each row keeps its own values across columns
    let mut seen: Vec<u64> = Vec::with_capacity(ids.len());
    for ((id, st), d) in ids.iter().zip(&status).zip(&dx) {
        let id = id.as_u64().expect("uint64 id");
        assert_eq!(*st, Value::U8((id % 3) as u8));
        assert_eq!(d.as_str(), Some(format!("D{id}").as_str()));
        seen.push(id);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..total).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn unwritable_column_file_is_an_io_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let b = bucket(dir.path(), codec_by_name("snappy")?, 100)?;
    let victim = b.column_file("Dx1");
    std::fs::remove_file(&victim)?;
    std::fs::create_dir(&victim)?;

    b.add(record(1))?;
    let err = b.flush().unwrap_err();
    assert!(matches!(err, Error::Io { ref path, .. } if *path == victim));
    Ok(())
}
