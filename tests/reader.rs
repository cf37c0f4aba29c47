use anyhow::Result;
use colshard::bucket::{Bucket, BucketOptions};
use colshard::io::compression::{codec_by_name, codec_names};
use colshard::testing::{MemorySource, claims_config, claims_table};
use colshard::{
    CodeTable, DType, Dataset, Error, FieldSpec, Record, Schema, Value, ingest_files, read_column,
};
use std::path::Path;
use std::sync::Arc;

/// One bucket with a `uint32` column and a dictionary-coded column.
fn coded_bucket(dir: &Path, rows: &[(u64, u32, u64)]) -> Result<Bucket> {
    let schema = Schema::new(
        vec![
            FieldSpec::new("Enrolid", "ENROLID", DType::U64),
            FieldSpec::new("Days", "DAYS", DType::U32),
            FieldSpec::new("Proc", "PROC", DType::Uvarint),
        ],
        "Enrolid",
    )?;
    let b = Bucket::create(
        0,
        dir.to_path_buf(),
        Arc::new(schema),
        codec_by_name("snappy")?,
        BucketOptions::default(),
    )?;
    for &(id, days, code) in rows {
        b.add(Record {
            subject_id: id,
            values: vec![Value::U64(id), Value::U32(days), Value::U64(code)],
        })?;
    }
    b.flush()?;
    Ok(b)
}

#[test]
fn fixed_width_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let rows: Vec<_> = (0..100u32).map(|i| (u64::from(i), i * 7, 0)).collect();
    let b = coded_bucket(dir.path(), &rows)?;
    let codec = codec_by_name("snappy")?;

    let days = read_column(b.dir(), "Days", DType::U32, 0, 100, None, codec.as_ref())?;
    let want: Vec<Value> = (0..100u32).map(|i| Value::U32(i * 7)).collect();
    assert_eq!(days, want);
    Ok(())
}

#[test]
fn range_past_the_end_is_truncated() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let rows: Vec<_> = (0..8u32).map(|i| (u64::from(i), i, 0)).collect();
    let b = coded_bucket(dir.path(), &rows)?;
    let codec = codec_by_name("snappy")?;

    let got = read_column(b.dir(), "Days", DType::U32, 5, 10, None, codec.as_ref())?;
    assert_eq!(got, vec![Value::U32(5), Value::U32(6), Value::U32(7)]);
    assert!(read_column(b.dir(), "Days", DType::U32, 20, 10, None, codec.as_ref())?.is_empty());
    Ok(())
}

#[test]
fn dictionary_codes_resolve_through_the_table() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let b = coded_bucket(dir.path(), &[(1, 0, 0), (2, 0, 2), (3, 0, 1), (4, 0, 9)])?;
    let codec = codec_by_name("snappy")?;
    let table: CodeTable = [(0, "A"), (1, "B"), (2, "C")].into_iter().collect();

    let got = read_column(b.dir(), "Proc", DType::Uvarint, 0, 4, Some(&table), codec.as_ref())?;
    let labels: Vec<_> = got.iter().map(|v| v.as_str().unwrap_or("?")).collect();
    assert_eq!(labels, ["A", "C", "B", ""]);

    let err = read_column(b.dir(), "Proc", DType::Uvarint, 0, 4, None, codec.as_ref());
    assert!(matches!(err, Err(Error::Config(_))));
    Ok(())
}

#[test]
fn dataset_reads_subjects_across_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("claims");
    let source = MemorySource::new()
        .with_table("a", claims_table(&[1, 2, 3, 4]))
        .with_table("b", claims_table(&[3, 5, 3]));
    let mut cfg = claims_config(4, &target);
    cfg.chunk_size = 2;
    ingest_files(&cfg, &source, &source.paths())?;

    let ds = Dataset::open(&target)?;
    assert_eq!(ds.conf().num_buckets, 4);
    assert_eq!(ds.bucket_for(3), 0);

    let rows = ds.read_subject(3, "Enrolid", &["Dx1".to_string(), "Pay".to_string()])?;
    assert_eq!(rows.bucket, 0);
    assert_eq!(rows.rows.len(), 3);
    let (name, dx) = &rows.columns[0];
    assert_eq!(name, "Dx1");
    assert!(dx.iter().all(|v| v.as_str() == Some("D3")));
    assert!(rows.columns[1].1.iter().all(|v| *v == Value::F32(4.5)));

    let nobody = ds.read_subject(999, "Enrolid", &[])?;
    assert!(nobody.rows.is_empty());
    assert_eq!(nobody.columns.len(), 4);
    Ok(())
}

#[test]
fn dataset_row_counts_and_types() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("claims");
    let source = MemorySource::new().with_table("a", claims_table(&[1, 2, 3, 4, 5, 6, 7, 8]));
    ingest_files(&claims_config(4, &target), &source, &source.paths())?;

    let ds = Dataset::open(&target)?;
    let total: u64 = (0..4)
        .map(|b| ds.row_count(b, "Enrolid"))
        .sum::<colshard::Result<u64>>()?;
    assert_eq!(total, 8);
    assert_eq!(ds.dtypes(0)?.get("Pay"), Some(&DType::F32));
    assert!(ds.bucket_dir(4).is_err());

    let dtypes = ds.bucket_dir(1)?.join("dtypes.json");
    std::fs::write(&dtypes, r#"{"Enrolid": "uint64", "Pay": "int128"}"#)?;
    assert!(matches!(
        ds.read_column(1, "Pay", 0, 1),
        Err(Error::UnknownType(n)) if n == "int128"
    ));
    Ok(())
}

#[test]
fn empty_buckets_read_as_zero_rows_under_every_codec() -> Result<()> {
    for name in codec_names() {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("claims");
        let source = MemorySource::new().with_table("a", claims_table(&[1, 3]));
        let mut cfg = claims_config(4, &target);
        cfg.compression = name.clone();
        ingest_files(&cfg, &source, &source.paths())?;

        let ds = Dataset::open(&target)?;
        for (bucket, rows) in [(0, 1), (1, 0), (2, 1), (3, 0)] {
            assert_eq!(ds.row_count(bucket, "Dx1")?, rows, "codec {name} bucket {bucket}");
        }
        assert!(ds.read_column(1, "Pay", 0, 10)?.is_empty(), "codec {name}");

        // id 2 routes to bucket 3, which never received a row
        let nobody = ds.read_subject(2, "Enrolid", &[])?;
        assert_eq!(nobody.bucket, 3);
        assert!(nobody.rows.is_empty(), "codec {name}");
        assert!(nobody.columns.iter().all(|(_, v)| v.is_empty()), "codec {name}");
    }
    Ok(())
}

#[test]
fn code_tables_load_from_the_codes_dir() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("t");
    let codes = dir.path().join("codes");
    std::fs::create_dir_all(&codes)?;
    std::fs::write(codes.join("Proc.json"), r#"{"0": "99213", "1": "99214"}"#)?;

    let bucket_dir = target.join("Buckets").join("0000");
    coded_bucket(&bucket_dir, &[(7, 1, 1), (7, 2, 0)])?;
    std::fs::write(
        target.join("conf.json"),
        format!(
            r#"{{"NumBuckets": 1, "Compression": "snappy", "CodesDir": {:?}}}"#,
            codes.display().to_string()
        ),
    )?;

    let ds = Dataset::open(&target)?;
    let got = ds.read_column(0, "Proc", 0, 10)?;
    assert_eq!(
        got,
        vec![Value::Text("99214".into()), Value::Text("99213".into())]
    );
    assert_eq!(ds.code_table("Proc")?.len(), 2);
    Ok(())
}
