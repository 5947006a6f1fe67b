// Copyright 2024 Zinc Labs Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Columnar stream reader (§4.2). Fetches each file's bytes whole (the same
//! "download then decode" pattern as
//! `openobserve/src/common/utils/parquet.rs::read_metadata`, which wraps
//! fetched bytes in a `Cursor` and hands that to
//! `ParquetRecordBatchStreamBuilder`) and yields Arrow `RecordBatch`es of at
//! most `chunk_size` rows each, converted to owned `UsageRecord`s so the
//! rest of the pipeline (§9 "per-row lambda over tabular data") can operate
//! with plain iterators instead of Arrow kernels.

use std::io::Cursor;

use arrow::array::{Array, DictionaryArray, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int32Type};
use arrow_schema::Schema;
use bytes::Bytes;
use chrono::NaiveDateTime;
use futures::StreamExt;
use object_store::{ObjectStore, path::Path};
use parquet::arrow::{ParquetRecordBatchStreamBuilder, ProjectionMask};

use crate::{
    error::{Error, Result},
    model::{LabelSet, UsageRecord},
};

/// The 14 columns named in §6 "Columnar file schema", in the order the spec
/// lists them.
pub const REQUIRED_COLUMNS: [&str; 14] = [
    "interval_start",
    "namespace",
    "node",
    "pod",
    "resource_id",
    "pod_labels",
    "pod_usage_cpu_core_seconds",
    "pod_request_cpu_core_seconds",
    "pod_limit_cpu_core_seconds",
    "pod_usage_memory_byte_seconds",
    "pod_request_memory_byte_seconds",
    "pod_limit_memory_byte_seconds",
    "node_capacity_cpu_core_seconds",
    "node_capacity_memory_byte_seconds",
];

/// Low-cardinality string columns eligible for dictionary encoding (§4.2,
/// `use_categorical=true`): namespace, node, pod, resource_id.
const CATEGORICAL_COLUMNS: [&str; 4] = ["namespace", "node", "pod", "resource_id"];

async fn fetch_bytes(store: &dyn ObjectStore, path: &str) -> Result<Bytes> {
    crate::retry::with_backoff("fetch file bytes", || async {
        let result = store.get(&Path::from(path)).await?;
        let bytes = result.bytes().await?;
        Ok(bytes)
    })
    .await
}

fn projection_mask(schema: &Schema, columns: &[&str]) -> Result<Option<Vec<usize>>> {
    let mut indices = Vec::with_capacity(columns.len());
    for col in columns {
        let idx = schema.index_of(col).map_err(|_| {
            Error::SchemaMismatch(format!("required column `{col}` absent from file schema"))
        })?;
        indices.push(idx);
    }
    Ok(Some(indices))
}

/// Recasts the low-cardinality string columns of `batch` to
/// `Dictionary(Int32, Utf8)` (§4.2 "may be converted to a dictionary-encoded
/// representation for memory efficiency when `use_categorical=true`"). Only
/// columns actually present in `batch` (post-projection) are touched; the
/// rest of the batch is passed through unchanged.
fn to_categorical(batch: RecordBatch) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut columns = batch.columns().to_vec();
    for name in CATEGORICAL_COLUMNS {
        let Ok(idx) = schema.index_of(name) else {
            continue;
        };
        if matches!(schema.field(idx).data_type(), DataType::Dictionary(_, _)) {
            continue;
        }
        let dict_ty = DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8));
        columns[idx] = cast(&columns[idx], &dict_ty)
            .map_err(|e| Error::Aggregation(format!("dictionary-encoding column `{name}`: {e}")))?;
    }
    RecordBatch::try_new(schema, columns)
        .map_err(|e| Error::Aggregation(format!("rebuilding dictionary-encoded batch: {e}")))
}

/// A string column that may have arrived plain (`Utf8`) or dictionary-encoded
/// (`Dictionary(Int32, Utf8)`, the shape `to_categorical` produces). Both
/// shapes collapse to the same `value`/`is_null` surface so the row-extraction
/// code below never branches on which one it got (§9 "Mixed types" applies
/// equally well here: one parser path, one return shape).
enum StrColumn<'a> {
    Plain(&'a StringArray),
    Dictionary {
        keys: &'a Int32Array,
        values: &'a StringArray,
    },
}

impl StrColumn<'_> {
    fn is_valid(&self, i: usize) -> bool {
        match self {
            StrColumn::Plain(a) => a.is_valid(i),
            StrColumn::Dictionary { keys, .. } => keys.is_valid(i),
        }
    }

    fn value(&self, i: usize) -> &str {
        match self {
            StrColumn::Plain(a) => a.value(i),
            StrColumn::Dictionary { keys, values } => values.value(keys.value(i) as usize),
        }
    }
}

async fn stream_file_inner<F>(
    store: &dyn ObjectStore,
    path: &str,
    column_filtering: bool,
    use_categorical: bool,
    chunk_size: usize,
    mut on_batch: F,
) -> Result<()>
where
    F: FnMut(Vec<UsageRecord>) -> Result<()>,
{
    let bytes = fetch_bytes(store, path).await?;
    if bytes.is_empty() {
        return Ok(());
    }

    let cursor = Cursor::new(bytes);
    let builder = ParquetRecordBatchStreamBuilder::new(cursor)
        .await
        .map_err(|e| Error::FileRead(format!("{path}: {e}")))?;
    let arrow_schema = builder.schema().clone();

    let mut builder = builder.with_batch_size(chunk_size);
    if column_filtering {
        if let Some(indices) = projection_mask(&arrow_schema, &REQUIRED_COLUMNS)? {
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
            builder = builder.with_projection(mask);
        }
    } else {
        // Even without column filtering, the 14 required columns must be
        // present (§4.2 "SchemaMismatch (required column absent) is
        // fatal") — validate without narrowing the projection.
        projection_mask(&arrow_schema, &REQUIRED_COLUMNS)?;
    }

    let mut stream = builder
        .build()
        .map_err(|e| Error::FileRead(format!("{path}: {e}")))?;

    while let Some(batch) = stream.next().await {
        let batch = batch.map_err(|e| Error::FileRead(format!("{path}: {e}")))?;
        let batch = if use_categorical {
            to_categorical(batch)?
        } else {
            batch
        };
        let records = record_batch_to_usage_records(&batch, path)?;
        on_batch(records)?;
    }
    Ok(())
}

/// Reads every `UsageRecord` in `path`, honoring `column_filtering` (§4.2)
/// and yielding batches of at most `chunk_size` rows via the callback
/// `on_batch`. A file's rows are never split across a call boundary into a
/// *different* file's stream (§4.2 "a batch never spans two files").
pub async fn stream_file<F>(
    store: &dyn ObjectStore,
    path: &str,
    column_filtering: bool,
    chunk_size: usize,
    on_batch: F,
) -> Result<()>
where
    F: FnMut(Vec<UsageRecord>) -> Result<()>,
{
    stream_file_inner(store, path, column_filtering, false, chunk_size, on_batch).await
}

/// Like [`stream_file`], but additionally dictionary-encodes the
/// low-cardinality string columns per batch when `use_categorical` is set
/// (§4.2).
pub async fn stream_file_categorical<F>(
    store: &dyn ObjectStore,
    path: &str,
    column_filtering: bool,
    use_categorical: bool,
    chunk_size: usize,
    on_batch: F,
) -> Result<()>
where
    F: FnMut(Vec<UsageRecord>) -> Result<()>,
{
    stream_file_inner(
        store,
        path,
        column_filtering,
        use_categorical,
        chunk_size,
        on_batch,
    )
    .await
}

/// Reads every `UsageRecord` from every file in `paths`, concatenated
/// (§4.2 `read_full`).
pub async fn read_full(
    store: &dyn ObjectStore,
    paths: &[String],
    column_filtering: bool,
) -> Result<Vec<UsageRecord>> {
    let mut all = Vec::new();
    for path in paths {
        stream_file(store, path, column_filtering, usize::MAX, |batch| {
            all.extend(batch);
            Ok(())
        })
        .await?;
    }
    Ok(all)
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str, path: &str) -> Result<StrColumn<'a>> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::SchemaMismatch(format!("{path}: required column `{name}` absent")))?;
    let column = batch.column(idx);
    match column.data_type() {
        DataType::Utf8 => {
            let array = column.as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                Error::SchemaMismatch(format!("{path}: column `{name}` is not string-typed"))
            })?;
            Ok(StrColumn::Plain(array))
        }
        DataType::Dictionary(key_ty, value_ty)
            if **key_ty == DataType::Int32 && **value_ty == DataType::Utf8 =>
        {
            let dict = column
                .as_any()
                .downcast_ref::<DictionaryArray<Int32Type>>()
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!(
                        "{path}: column `{name}` is not a valid Int32 dictionary"
                    ))
                })?;
            let values = dict.values().as_any().downcast_ref::<StringArray>().ok_or_else(|| {
                Error::SchemaMismatch(format!(
                    "{path}: column `{name}` dictionary values are not string-typed"
                ))
            })?;
            Ok(StrColumn::Dictionary {
                keys: dict.keys(),
                values,
            })
        }
        other => Err(Error::SchemaMismatch(format!(
            "{path}: column `{name}` has unsupported type {other:?}"
        ))),
    }
}

fn f64_col<'a>(batch: &'a RecordBatch, name: &str, path: &str) -> Result<&'a Float64Array> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::SchemaMismatch(format!("{path}: required column `{name}` absent")))?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::SchemaMismatch(format!("{path}: column `{name}` is not float64-typed")))
}

/// Null -> 0.0 (invariant 4, "null->0 in all arithmetic").
fn f64_at(col: &Float64Array, i: usize) -> f64 {
    if col.is_null(i) { 0.0 } else { col.value(i) }
}

fn str_at(col: &StrColumn, i: usize) -> Option<String> {
    if col.is_valid(i) {
        Some(col.value(i).to_string())
    } else {
        None
    }
}

fn parse_interval_start(raw: &str, path: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| Error::FileRead(format!("{path}: bad interval_start `{raw}`: {e}")))
}

fn parse_labels(raw: Option<&str>) -> LabelSet {
    match raw {
        None => LabelSet::new(),
        Some(s) if s.trim().is_empty() => LabelSet::new(),
        Some(s) => serde_json::from_str(s).unwrap_or_default(),
    }
}

fn record_batch_to_usage_records(batch: &RecordBatch, path: &str) -> Result<Vec<UsageRecord>> {
    let interval_start = string_col(batch, "interval_start", path)?;
    let namespace = string_col(batch, "namespace", path)?;
    let node = string_col(batch, "node", path)?;
    let pod = string_col(batch, "pod", path)?;
    let resource_id = string_col(batch, "resource_id", path)?;
    let pod_labels = string_col(batch, "pod_labels", path)?;
    let usage_cpu = f64_col(batch, "pod_usage_cpu_core_seconds", path)?;
    let request_cpu = f64_col(batch, "pod_request_cpu_core_seconds", path)?;
    let limit_cpu = f64_col(batch, "pod_limit_cpu_core_seconds", path)?;
    let usage_mem = f64_col(batch, "pod_usage_memory_byte_seconds", path)?;
    let request_mem = f64_col(batch, "pod_request_memory_byte_seconds", path)?;
    let limit_mem = f64_col(batch, "pod_limit_memory_byte_seconds", path)?;
    let cap_cpu = f64_col(batch, "node_capacity_cpu_core_seconds", path)?;
    let cap_mem = f64_col(batch, "node_capacity_memory_byte_seconds", path)?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let ts_raw = interval_start
            .is_valid(i)
            .then(|| interval_start.value(i))
            .ok_or_else(|| Error::FileRead(format!("{path}: row {i} has null interval_start")))?;
        records.push(UsageRecord {
            interval_start: parse_interval_start(ts_raw, path)?,
            namespace: namespace.value(i).to_string(),
            node: str_at(&node, i).unwrap_or_default(),
            pod: pod.value(i).to_string(),
            resource_id: str_at(&resource_id, i),
            pod_labels: parse_labels(str_at(&pod_labels, i).as_deref()),
            pod_usage_cpu_core_seconds: f64_at(usage_cpu, i),
            pod_request_cpu_core_seconds: f64_at(request_cpu, i),
            pod_limit_cpu_core_seconds: f64_at(limit_cpu, i),
            pod_usage_memory_byte_seconds: f64_at(usage_mem, i),
            pod_request_memory_byte_seconds: f64_at(request_mem, i),
            pod_limit_memory_byte_seconds: f64_at(limit_mem, i),
            node_capacity_cpu_core_seconds: f64_at(cap_cpu, i),
            node_capacity_memory_byte_seconds: f64_at(cap_mem, i),
        });
    }
    Ok(records)
}

/// Reads a `*node_labels*` or `*namespace_labels*` file into `(key, labels)`
/// pairs, where `key_column` is `"node"` or `"namespace"`. These files carry
/// one row per `(key, hour)` — deduplication to one row per key is the
/// caller's job (`driver.rs`'s label-snapshot builder), not this reader's
/// (§5 "Memory discipline": dedup is correctness-critical, not an
/// optimization, and keeping it out of the reader keeps the reader honest
/// about what it yields).
pub async fn read_label_rows(
    store: &dyn ObjectStore,
    path: &str,
    key_column: &str,
) -> Result<Vec<(String, LabelSet)>> {
    let bytes = fetch_bytes(store, path).await?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let cursor = Cursor::new(bytes);
    let builder = ParquetRecordBatchStreamBuilder::new(cursor)
        .await
        .map_err(|e| Error::FileRead(format!("{path}: {e}")))?;
    let mut stream = builder
        .build()
        .map_err(|e| Error::FileRead(format!("{path}: {e}")))?;

    let mut out = Vec::new();
    while let Some(batch) = stream.next().await {
        let batch = batch.map_err(|e| Error::FileRead(format!("{path}: {e}")))?;
        let keys = string_col(&batch, key_column, path)?;
        let labels = string_col(&batch, "labels", path)?;
        for i in 0..batch.num_rows() {
            if !keys.is_valid(i) {
                continue;
            }
            out.push((keys.value(i).to_string(), parse_labels(str_at(&labels, i).as_deref())));
        }
    }
    Ok(out)
}
