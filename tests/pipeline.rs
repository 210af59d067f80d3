use std::path::Path;
use std::sync::Arc;

use arrow::array::{AsArray, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures::TryStreamExt;
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

use tabkit::config::{Config, FormatConfig};
use tabkit::formats::get_format;
use tabkit::reader::PARTITIONS_KEY;
use tabkit::storage::write_all;
use tabkit::streaming::{NoProgress, Window, WindowedRows, concat_plans, encode_batches, write_partitioned};
use tabkit::table::SummaryValue;
use tabkit::{BackendResolver, Engine, TabError, TableReader, open_reader};

struct Harness {
    engine: Engine,
    resolver: BackendResolver,
    formats: FormatConfig,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let config = Config::default();
        Self {
            engine: Engine::new(&config.processing),
            resolver: BackendResolver::from_config(&config.storage),
            formats: config.formats,
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn open(&self, location: &str, format: Option<&str>) -> tabkit::Result<Box<dyn TableReader>> {
        open_reader(&self.engine, &self.resolver, location, format, &self.formats).await
    }
}

/// `id,name` rows numbered from 1.
fn events_csv(rows: i64) -> String {
    let mut csv = String::from("id,name\n");
    for id in 1..=rows {
        csv.push_str(&format!("{id},event-{id}\n"));
    }
    csv
}

fn ids(rows: &WindowedRows) -> Vec<i64> {
    rows.batches
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<Int64Type>().values().to_vec())
        .collect()
}

fn write_parquet(path: &Path, start: i64, rows: i64) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(start..start + rows)),
            Arc::new(StringArray::from_iter_values((start..start + rows).map(|i| format!("n{i}")))),
        ],
    )
    .unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = ArrowWriter::try_new(std::fs::File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

#[tokio::test]
async fn test_view_short_file_is_not_truncated() {
    let h = Harness::new();
    let path = h.write("data/events.csv", &events_csv(8));

    let reader = h.open(&path, None).await.unwrap();
    assert_eq!(reader.format().name(), "csv");

    let rows = Window::default().collect(reader.read().await.unwrap(), 20).await.unwrap();
    assert!(!rows.truncated);
    assert_eq!(ids(&rows), (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_view_skip_and_explicit_limit() {
    let h = Harness::new();
    let path = h.write("data/events.csv", &events_csv(8));
    let reader = h.open(&path, None).await.unwrap();

    let rows = Window::new(6, Some(10)).collect(reader.read().await.unwrap(), 20).await.unwrap();
    assert!(!rows.truncated);
    assert_eq!(ids(&rows), vec![7, 8]);
}

#[tokio::test]
async fn test_view_long_file_is_truncated_at_default_limit() {
    let h = Harness::new();
    let path = h.write("long.csv", &events_csv(50));
    let reader = h.open(&path, None).await.unwrap();

    let rows = Window::new(5, None).collect(reader.read().await.unwrap(), 20).await.unwrap();
    assert!(rows.truncated);
    assert_eq!(ids(&rows), (6..=25).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_partitioned_parquet_summary() {
    let h = Harness::new();
    write_parquet(&h.dir.path().join("ds/part-00000.parquet"), 0, 10);
    write_parquet(&h.dir.path().join("ds/part-00001.parquet"), 10, 5);
    h.write("ds/_SUCCESS", "");
    h.write("ds/.part-00000.parquet.crc", "junk");

    let reader = h.open(&h.path("ds"), None).await.unwrap();
    assert_eq!(reader.format().name(), "parquet");

    let summary = reader.summary().await.unwrap();
    assert_eq!(summary.num_rows, 15);
    assert_eq!(summary.num_columns, 2);
    let extra = summary.extra.unwrap();
    assert_eq!(extra[PARTITIONS_KEY], SummaryValue::Int(2));
    assert_eq!(extra["Row groups"], SummaryValue::Int(2));
    assert_eq!(extra["Compression"].to_string(), "UNCOMPRESSED");

    let sizes: u64 = ["ds/part-00000.parquet", "ds/part-00001.parquet"]
        .iter()
        .map(|name| std::fs::metadata(h.dir.path().join(name)).unwrap().len())
        .sum();
    assert_eq!(summary.file_size, sizes);

    // rows come back in listing order
    let rows = Window::new(8, Some(4)).collect(reader.read().await.unwrap(), 20).await.unwrap();
    assert_eq!(ids(&rows), vec![8, 9, 10, 11]);
}

#[tokio::test]
async fn test_directory_schema_mismatch_fails_fast() {
    let h = Harness::new();
    h.write("mixed/a.csv", "x,y\n1,2\n");
    h.write("mixed/b.csv", "x,z\n3,4\n");

    let reader = h.open(&h.path("mixed"), None).await.unwrap();
    let err = reader.read().await.err().unwrap();
    match err {
        TabError::SchemaMismatch { message, .. } => assert!(message.contains("b.csv"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }

    // the schema is taken from the first file alone
    let schema = reader.schema().await.unwrap();
    assert_eq!(schema.names(), vec!["x", "y"]);
}

#[tokio::test]
async fn test_directory_summary_rejects_column_count_mismatch() {
    let h = Harness::new();
    h.write("uneven/a.csv", "x,y\n1,2\n");
    h.write("uneven/b.csv", "x,y,z\n3,4,5\n");

    let reader = h.open(&h.path("uneven"), None).await.unwrap();
    let err = reader.summary().await.err().unwrap();
    assert!(
        matches!(err, TabError::InconsistentSchema { expected: 2, found: 3, ref file, .. } if file.ends_with("b.csv")),
        "{err}"
    );
}

#[tokio::test]
async fn test_directory_without_data_files_is_empty_dataset() {
    let h = Harness::new();
    h.write("empty/_SUCCESS", "");

    let err = h.open(&h.path("empty"), None).await.err().unwrap();
    assert!(matches!(err, TabError::EmptyDataset { .. }), "{err}");

    let reader = h.open(&h.path("empty"), Some("csv")).await.unwrap();
    let err = reader.read().await.err().unwrap();
    assert!(matches!(err, TabError::EmptyDataset { ref extension, .. } if extension == ".csv"), "{err}");
}

#[tokio::test]
async fn test_unknown_extension_names_the_file() {
    let h = Harness::new();
    let path = h.write("notes.txt", "hello\n");
    let err = h.open(&path, None).await.err().unwrap();
    assert!(matches!(err, TabError::UnknownExtension { .. }));
    assert!(err.to_string().contains("notes.txt"));

    // an explicit format wins over the extension
    let reader = h.open(&path, Some("csv")).await.unwrap();
    assert_eq!(reader.schema().await.unwrap().names(), vec!["hello"]);
}

#[tokio::test]
async fn test_round_trip_through_every_format() {
    let h = Harness::new();
    let source = h.write("source.csv", &events_csv(12));
    let reader = h.open(&source, None).await.unwrap();
    let expected = reader.schema().await.unwrap();

    for name in ["csv", "tsv", "parquet", "jsonl", "avro"] {
        let format = get_format(name, &h.formats).unwrap();
        let target = h.path(&format!("out/events{}", format.extension()));
        let backend = h.resolver.resolve(&target).await.unwrap();
        let path = h.engine.attach(backend.as_ref(), &target).await.unwrap();
        std::fs::create_dir_all(h.dir.path().join("out")).unwrap();
        format
            .write_single(h.engine.context(), reader.read().await.unwrap(), &path)
            .await
            .unwrap();

        let back = h.open(&target, None).await.unwrap();
        assert_eq!(back.format().name(), name);
        let schema = back.schema().await.unwrap();
        assert_eq!(schema.names(), expected.names(), "{name}");
        let types: Vec<&DataType> = schema.columns().iter().map(|c| &c.data_type).collect();
        assert_eq!(types, vec![&DataType::Int64, &DataType::Utf8], "{name}");
        assert_eq!(back.summary().await.unwrap().num_rows, 12, "{name}");
    }
}

#[tokio::test]
async fn test_partitioned_convert_then_read_back() {
    let h = Harness::new();
    let source = h.write("source.csv", &events_csv(10));
    let reader = h.open(&source, None).await.unwrap();
    let format = get_format("parquet", &h.formats).unwrap();
    let destination = h.path("parts");
    let backend = h.resolver.resolve(&destination).await.unwrap();

    let written = write_partitioned(
        &h.engine,
        backend.as_ref(),
        format.as_ref(),
        reader.read().await.unwrap(),
        &destination,
        4,
        &NoProgress,
    )
    .await
    .unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|w| Path::new(w).file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["part-00000.parquet", "part-00001.parquet", "part-00002.parquet", "part-00003.parquet"]
    );

    let back = h.open(&destination, None).await.unwrap();
    let summary = back.summary().await.unwrap();
    assert_eq!(summary.num_rows, 10);
    assert_eq!(summary.extra.unwrap()[PARTITIONS_KEY], SummaryValue::Int(4));

    let last = h.open(&written[3], None).await.unwrap();
    assert_eq!(last.summary().await.unwrap().num_rows, 1);

    let rows = Window::default().collect(back.read().await.unwrap(), 20).await.unwrap();
    assert_eq!(ids(&rows), (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_partitioned_write_of_empty_input_creates_directory_only() {
    let h = Harness::new();
    let source = h.write("header_only.csv", "id,name\n");
    let reader = h.open(&source, None).await.unwrap();
    let format = get_format("csv", &h.formats).unwrap();
    let destination = h.path("nothing");
    let backend = h.resolver.resolve(&destination).await.unwrap();

    let written = write_partitioned(
        &h.engine,
        backend.as_ref(),
        format.as_ref(),
        reader.read().await.unwrap(),
        &destination,
        3,
        &NoProgress,
    )
    .await
    .unwrap();
    assert!(written.is_empty());
    assert!(h.dir.path().join("nothing").is_dir());
}

#[tokio::test]
async fn test_sql_over_table_t() {
    let h = Harness::new();
    let path = h.write("events.csv", &events_csv(8));
    let reader = h.open(&path, None).await.unwrap();

    let plan = h
        .engine
        .sql(reader.read().await.unwrap(), "SELECT id FROM t WHERE id % 2 = 0 ORDER BY id DESC")
        .await
        .unwrap();
    let rows = Window::default().collect(plan, 20).await.unwrap();
    assert_eq!(ids(&rows), vec![8, 6, 4, 2]);
}

#[tokio::test]
async fn test_cat_streams_inputs_in_order() {
    let h = Harness::new();
    let first = h.write("a.csv", "id,name\n1,x\n2,y\n");
    let second = h.write("b.csv", "id,name\n3,z\n");

    let mut inputs = Vec::new();
    for path in [&first, &second] {
        let reader = h.open(path, None).await.unwrap();
        inputs.push((path.clone(), reader.read().await.unwrap()));
    }
    let (schema, batches) = concat_plans(inputs).unwrap();
    let format = get_format("jsonl", &h.formats).unwrap();
    let chunks: Vec<Bytes> = encode_batches(batches, format.encoder(schema).unwrap())
        .try_collect()
        .await
        .unwrap();
    let text = String::from_utf8(chunks.concat()).unwrap();
    assert_eq!(
        text,
        "{\"id\":1,\"name\":\"x\"}\n{\"id\":2,\"name\":\"y\"}\n{\"id\":3,\"name\":\"z\"}\n"
    );
}

#[tokio::test]
async fn test_memory_store_through_the_generic_backend() {
    let h = Harness::new();
    let backend = h.resolver.resolve("memory:///ds/a.csv").await.unwrap();
    write_all(backend.as_ref(), "memory:///ds/a.csv", Bytes::from(events_csv(3)))
        .await
        .unwrap();
    write_all(backend.as_ref(), "memory:///ds/b.csv", Bytes::from("id,name\n4,event-4\n"))
        .await
        .unwrap();

    let reader = h.open("memory:///ds", None).await.unwrap();
    let summary = reader.summary().await.unwrap();
    assert_eq!(summary.num_rows, 4);
    assert_eq!(summary.extra.unwrap()[PARTITIONS_KEY], SummaryValue::Int(2));

    let rows = Window::default().collect(reader.read().await.unwrap(), 20).await.unwrap();
    assert_eq!(ids(&rows), vec![1, 2, 3, 4]);
}
