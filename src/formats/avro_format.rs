use std::collections::HashSet;
use std::io::Write;

use apache_avro::types::Value;
use apache_avro::{Schema as AvroSchema, Writer};
use arrow::array::{ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int32Type, Int64Type, Schema, SchemaRef,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use datafusion::dataframe::DataFrame;
use datafusion::prelude::{AvroReadOptions, SessionContext};
use serde_json::json;

use super::DataFormat;
use crate::error::{Result, TabError};
use crate::streaming::{BatchEncoder, SharedBuffer};

/// Avro object container files, written with the null codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroFormat;

#[async_trait]
impl DataFormat for AvroFormat {
    fn name(&self) -> &'static str {
        "avro"
    }

    fn extension(&self) -> &'static str {
        ".avro"
    }

    async fn scan(&self, ctx: &SessionContext, paths: Vec<String>) -> Result<DataFrame> {
        let options = AvroReadOptions {
            file_extension: "",
            ..Default::default()
        };
        Ok(ctx.read_avro(paths, options).await?)
    }

    fn encoder(&self, schema: SchemaRef) -> Result<Box<dyn BatchEncoder>> {
        Ok(Box::new(AvroEncoder::try_new(&schema)?))
    }
}

/// How one arrow column is written.
#[derive(Debug, Clone)]
enum AvroKind {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    Date,
    TimestampMillis(Option<std::sync::Arc<str>>),
    TimestampMicros(Option<std::sync::Arc<str>>),
    String,
}

impl AvroKind {
    fn of(data_type: &DataType) -> Self {
        match data_type {
            DataType::Boolean => Self::Boolean,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::UInt8 | DataType::UInt16 => {
                Self::Int
            }
            DataType::Int64 | DataType::UInt32 | DataType::UInt64 => Self::Long,
            DataType::Float16 | DataType::Float32 => Self::Float,
            DataType::Float64 => Self::Double,
            DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => Self::Bytes,
            DataType::Date32 | DataType::Date64 => Self::Date,
            DataType::Timestamp(TimeUnit::Millisecond, tz) => Self::TimestampMillis(tz.clone()),
            DataType::Timestamp(_, tz) => Self::TimestampMicros(tz.clone()),
            _ => Self::String,
        }
    }

    fn schema_json(&self) -> serde_json::Value {
        match self {
            Self::Boolean => json!("boolean"),
            Self::Int => json!("int"),
            Self::Long => json!("long"),
            Self::Float => json!("float"),
            Self::Double => json!("double"),
            Self::Bytes => json!("bytes"),
            Self::String => json!("string"),
            Self::Date => json!({"type": "int", "logicalType": "date"}),
            Self::TimestampMillis(_) => json!({"type": "long", "logicalType": "timestamp-millis"}),
            Self::TimestampMicros(_) => json!({"type": "long", "logicalType": "timestamp-micros"}),
        }
    }

    /// Arrow type the column is cast to before reading values out.
    fn arrow_type(&self) -> DataType {
        match self {
            Self::Boolean => DataType::Boolean,
            Self::Int => DataType::Int32,
            Self::Long => DataType::Int64,
            Self::Float => DataType::Float32,
            Self::Double => DataType::Float64,
            Self::Bytes => DataType::Binary,
            Self::Date => DataType::Date32,
            Self::TimestampMillis(tz) => DataType::Timestamp(TimeUnit::Millisecond, tz.clone()),
            Self::TimestampMicros(tz) => DataType::Timestamp(TimeUnit::Microsecond, tz.clone()),
            Self::String => DataType::Utf8,
        }
    }

    fn values(&self, column: &ArrayRef) -> Result<Vec<Value>> {
        let array = cast(column, &self.arrow_type())?;
        let values = match self {
            Self::Boolean => array.as_boolean().iter().map(|v| v.map(Value::Boolean)).collect(),
            Self::Int => prim::<Int32Type, _>(&array, Value::Int),
            Self::Long => prim::<Int64Type, _>(&array, Value::Long),
            Self::Float => prim::<Float32Type, _>(&array, Value::Float),
            Self::Double => prim::<Float64Type, _>(&array, Value::Double),
            Self::Date => prim::<Date32Type, _>(&array, Value::Date),
            Self::TimestampMillis(_) => prim::<TimestampMillisecondType, _>(&array, Value::TimestampMillis),
            Self::TimestampMicros(_) => prim::<TimestampMicrosecondType, _>(&array, Value::TimestampMicros),
            Self::Bytes => array
                .as_binary::<i32>()
                .iter()
                .map(|v| v.map(|b| Value::Bytes(b.to_vec())))
                .collect(),
            Self::String => array
                .as_string::<i32>()
                .iter()
                .map(|v| v.map(|s| Value::String(s.to_string())))
                .collect::<Vec<_>>(),
        };
        Ok(values
            .into_iter()
            .map(|v| v.unwrap_or(Value::Null))
            .collect())
    }
}

fn prim<T, F>(array: &ArrayRef, wrap: F) -> Vec<Option<Value>>
where
    T: arrow::datatypes::ArrowPrimitiveType,
    F: Fn(T::Native) -> Value,
{
    array.as_primitive::<T>().iter().map(|v| v.map(&wrap)).collect()
}

/// Avro names allow `[A-Za-z0-9_]` and must not start with a digit.
fn avro_name(name: &str, taken: &mut HashSet<String>) -> String {
    let mut clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if clean.is_empty() || clean.starts_with(|c: char| c.is_ascii_digit()) {
        clean.insert(0, '_');
    }
    let mut unique = clean.clone();
    let mut n = 1;
    while !taken.insert(unique.clone()) {
        unique = format!("{clean}_{n}");
        n += 1;
    }
    unique
}

struct AvroField {
    name: String,
    kind: AvroKind,
    nullable: bool,
}

/// Object container file writer. The header waits in the buffer until the
/// first drain; every batch after it is flushed as its own block.
struct AvroEncoder {
    schema: AvroSchema,
    fields: Vec<AvroField>,
    buffer: SharedBuffer,
    marker: [u8; 16],
}

impl AvroEncoder {
    fn try_new(schema: &Schema) -> Result<Self> {
        let mut taken = HashSet::new();
        let fields: Vec<AvroField> = schema
            .fields()
            .iter()
            .map(|f| AvroField {
                name: avro_name(f.name(), &mut taken),
                kind: AvroKind::of(f.data_type()),
                nullable: f.is_nullable(),
            })
            .collect();

        let record = json!({
            "type": "record",
            "name": "Row",
            "namespace": "tabkit",
            "fields": fields.iter().map(|f| {
                let ty = f.kind.schema_json();
                let ty = if f.nullable { json!(["null", ty]) } else { ty };
                json!({"name": f.name, "type": ty})
            }).collect::<Vec<_>>(),
        })
        .to_string();
        let avro_schema = AvroSchema::parse_str(&record)?;

        // the header ends with the sync marker the blocks must repeat
        let header = Writer::new(&avro_schema, Vec::new()).into_inner()?;
        let marker: [u8; 16] = header[header.len().saturating_sub(16)..]
            .try_into()
            .map_err(|_| TabError::config("avro header shorter than its sync marker"))?;
        let mut buffer = SharedBuffer::default();
        buffer.write_all(&header)?;

        Ok(Self {
            schema: avro_schema,
            fields,
            buffer,
            marker,
        })
    }
}

impl BatchEncoder for AvroEncoder {
    fn encode(&mut self, batch: &RecordBatch) -> Result<Bytes> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for (field, column) in self.fields.iter().zip(batch.columns()) {
            columns.push(field.kind.values(column)?.into_iter());
        }

        let mut writer = Writer::append_to(&self.schema, self.buffer.clone(), self.marker);
        for _ in 0..batch.num_rows() {
            let mut record = Vec::with_capacity(self.fields.len());
            for (field, values) in self.fields.iter().zip(columns.iter_mut()) {
                let value = values.next().unwrap_or(Value::Null);
                let value = match (field.nullable, value) {
                    (true, Value::Null) => Value::Union(0, Box::new(Value::Null)),
                    (true, v) => Value::Union(1, Box::new(v)),
                    (false, v) => v,
                };
                record.push((field.name.clone(), value));
            }
            writer.append(Value::Record(record))?;
        }
        writer.flush()?;
        Ok(self.buffer.drain())
    }

    fn finish(&mut self) -> Result<Bytes> {
        Ok(self.buffer.drain())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apache_avro::Reader;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::Field;

    use super::*;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("first name", DataType::Utf8, true),
            Field::new("score", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("ada"), None])),
                Arc::new(Float64Array::from(vec![Some(1.5), Some(2.0)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_container_file_is_readable() {
        let batch = batch();
        let mut encoder = AvroFormat.encoder(batch.schema()).unwrap();
        let mut file = encoder.encode(&batch).unwrap().to_vec();
        file.extend_from_slice(&encoder.encode(&batch).unwrap());
        file.extend_from_slice(&encoder.finish().unwrap());

        let reader = Reader::new(&file[..]).unwrap();
        let rows: Vec<Value> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        let Value::Record(fields) = &rows[1] else {
            panic!("expected a record, got {:?}", rows[1]);
        };
        assert_eq!(fields[0], ("id".to_string(), Value::Long(2)));
        assert_eq!(fields[1].0, "first_name");
        assert_eq!(fields[1].1, Value::Union(0, Box::new(Value::Null)));
    }

    #[test]
    fn test_empty_output_is_header_only() {
        let mut encoder = AvroFormat.encoder(batch().schema()).unwrap();
        let file = encoder.finish().unwrap();
        assert!(file.starts_with(b"Obj\x01"));
        let reader = Reader::new(&file[..]).unwrap();
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_each_batch_is_one_block_with_the_file_marker() {
        let batch = batch();
        let mut encoder = AvroFormat.encoder(batch.schema()).unwrap();
        let first = encoder.encode(&batch).unwrap();
        let second = encoder.encode(&batch).unwrap();
        assert!(!second.starts_with(b"Obj\x01"));
        assert_eq!(first[first.len() - 16..], second[second.len() - 16..]);
        assert!(encoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_names_are_sanitised_and_unique() {
        let mut taken = HashSet::new();
        assert_eq!(avro_name("a b", &mut taken), "a_b");
        assert_eq!(avro_name("a-b", &mut taken), "a_b_1");
        assert_eq!(avro_name("2024", &mut taken), "_2024");
    }
}
