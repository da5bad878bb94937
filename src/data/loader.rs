use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array};
use arrow::datatypes::{
    ArrowNativeType, ArrowPrimitiveType, DataType, Int8Type, Int16Type, Int32Type, Int64Type,
    UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Column, ColumnStore, DataIdentity};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a run store.
///
/// Supported layouts:
/// * a directory – every `.parquet` / `.csv` table under `root/<group>/`
///   contributes its columns as fields of `<group>` (e.g. `Plane2/Clusters`)
/// * `.json` – nested objects for groups, arrays for fields
pub fn load_store(path: &Path) -> Result<ColumnStore> {
    if path.is_dir() {
        return load_dir(path);
    }
    match extension(path).as_str() {
        "json" => load_json(path),
        other => bail!("Unsupported store: .{other} (expected a directory or .json)"),
    }
}

/// Compute the identity of the files behind a store.
pub fn data_identity(path: &Path, run: u32) -> Result<DataIdentity> {
    let files = if path.is_dir() {
        table_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut identity = DataIdentity::in_memory(run);
    for file in &files {
        let meta = fs::metadata(file).with_context(|| format!("stat {}", file.display()))?;
        identity.bytes += meta.len();
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        identity.modified = identity.modified.max(modified);
    }
    Ok(identity)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Directory loader
// ---------------------------------------------------------------------------

fn table_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).with_context(|| format!("listing {}", dir.display()))?;
        for entry in entries {
            let path = entry.context("reading directory entry")?.path();
            if path.is_dir() {
                pending.push(path);
            } else if matches!(extension(&path).as_str(), "parquet" | "pq" | "csv") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn load_dir(root: &Path) -> Result<ColumnStore> {
    let mut store = ColumnStore::new();

    for file in table_files(root)? {
        let group = file
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default();
        if group.is_empty() {
            bail!("{}: tables must live inside a group directory", file.display());
        }

        let fields = match extension(&file).as_str() {
            "csv" => read_csv_table(&file)?,
            _ => read_parquet_table(&file)?,
        };
        log::debug!("{} → {group} ({} fields)", file.display(), fields.len());

        for (field, column) in fields {
            if store.column(&group, &field).is_ok() {
                bail!("{}: field '{group}/{field}' defined twice", file.display());
            }
            store.insert(&group, &field, column);
        }
    }

    Ok(store)
}

// ---------------------------------------------------------------------------
// Parquet tables
// ---------------------------------------------------------------------------

/// Read every column of a Parquet file, concatenating record batches.
fn read_parquet_table(path: &Path) -> Result<BTreeMap<String, Column>> {
    let file = fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut fields: BTreeMap<String, Column> = BTreeMap::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        for (i, field) in schema.fields().iter().enumerate() {
            let name = field.name();
            let column = arrow_to_column(batch.column(i), name)
                .with_context(|| format!("{}: column '{name}'", path.display()))?;
            match fields.get_mut(name.as_str()) {
                Some(existing) => {
                    if !existing.extend(column) {
                        bail!("column '{name}' changes type between batches");
                    }
                }
                None => {
                    fields.insert(name.clone(), column);
                }
            }
        }
    }
    Ok(fields)
}

fn arrow_to_column(col: &ArrayRef, name: &str) -> Result<Column> {
    match col.data_type() {
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            Ok(Column::Float(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect()))
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            Ok(Column::Float(
                arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect(),
            ))
        }
        DataType::Boolean => {
            if col.null_count() > 0 {
                bail!("boolean column '{name}' contains nulls");
            }
            let arr = col
                .as_any()
                .downcast_ref::<BooleanArray>()
                .context("expected BooleanArray")?;
            Ok(Column::Bool(arr.iter().map(|v| v.unwrap_or(false)).collect()))
        }
        DataType::Int8 => integers::<Int8Type>(col, name),
        DataType::Int16 => integers::<Int16Type>(col, name),
        DataType::Int32 => integers::<Int32Type>(col, name),
        DataType::Int64 => integers::<Int64Type>(col, name),
        DataType::UInt8 => integers::<UInt8Type>(col, name),
        DataType::UInt16 => integers::<UInt16Type>(col, name),
        DataType::UInt32 => integers::<UInt32Type>(col, name),
        DataType::UInt64 => integers::<UInt64Type>(col, name),
        other => bail!("unsupported column type {other:?}"),
    }
}

fn integers<T: ArrowPrimitiveType>(col: &ArrayRef, name: &str) -> Result<Column> {
    if col.null_count() > 0 {
        bail!("integer column '{name}' contains nulls");
    }
    col.as_primitive::<T>()
        .values()
        .iter()
        .map(|v| {
            v.to_i64()
                .with_context(|| format!("value in '{name}' does not fit in i64"))
        })
        .collect::<Result<Vec<_>>>()
        .map(Column::Integer)
}

// ---------------------------------------------------------------------------
// CSV tables
// ---------------------------------------------------------------------------

/// CSV layout: header row with field names, one row per entry.
/// Each column gets the narrowest type all of its cells parse as
/// (integer, float, bool).
fn read_csv_table(path: &Path) -> Result<BTreeMap<String, Column>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col_idx, value) in record.iter().enumerate() {
            if let Some(column) = cells.get_mut(col_idx) {
                column.push(value.trim().to_string());
            }
        }
    }

    headers
        .into_iter()
        .zip(cells)
        .map(|(name, values)| {
            let column = guess_column_type(&values)
                .with_context(|| format!("{}: column '{name}'", path.display()))?;
            Ok((name, column))
        })
        .collect()
}

fn guess_column_type(values: &[String]) -> Result<Column> {
    if let Ok(ints) = values.iter().map(|s| s.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
        return Ok(Column::Integer(ints));
    }
    if let Ok(floats) = values
        .iter()
        .map(|s| if s.is_empty() { Ok(f64::NAN) } else { s.parse::<f64>() })
        .collect::<Result<Vec<_>, _>>()
    {
        return Ok(Column::Float(floats));
    }
    values
        .iter()
        .map(|s| match s.as_str() {
            "true" | "True" => Ok(true),
            "false" | "False" => Ok(false),
            other => bail!("'{other}' is neither numeric nor boolean"),
        })
        .collect::<Result<Vec<_>>>()
        .map(Column::Bool)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema:
///
/// ```json
/// {
///   "Event":  { "Time": [0.0, 0.1], "TriggerPhase": [3, 4] },
///   "Tracks": { "NTracks": [1, 0], "Size": [6], "Chi2": [1.2] },
///   "Plane2": { "Clusters": { "X": [12.0], "Track": [0] } }
/// }
/// ```
fn load_json(path: &Path) -> Result<ColumnStore> {
    let text = fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let groups = root.as_object().context("Expected top-level JSON object")?;

    let mut store = ColumnStore::new();
    for (name, value) in groups {
        collect_json_group(&mut store, name, value)?;
    }
    Ok(store)
}

fn collect_json_group(store: &mut ColumnStore, group: &str, value: &JsonValue) -> Result<()> {
    let members = value
        .as_object()
        .with_context(|| format!("group '{group}' is not a JSON object"))?;
    for (key, member) in members {
        match member {
            JsonValue::Array(values) => {
                let column = json_to_column(values)
                    .with_context(|| format!("field '{group}/{key}'"))?;
                store.insert(group, key, column);
            }
            JsonValue::Object(_) => collect_json_group(store, &format!("{group}/{key}"), member)?,
            other => bail!("'{group}/{key}' must be an array or a group, got {other}"),
        }
    }
    Ok(())
}

fn json_to_column(values: &[JsonValue]) -> Result<Column> {
    if !values.is_empty() && values.iter().all(JsonValue::is_boolean) {
        return Ok(Column::Bool(values.iter().filter_map(JsonValue::as_bool).collect()));
    }
    if values.iter().all(|v| v.is_i64() || v.is_u64()) {
        return values
            .iter()
            .map(|v| v.as_i64().context("integer does not fit in i64"))
            .collect::<Result<Vec<_>>>()
            .map(Column::Integer);
    }
    values
        .iter()
        .enumerate()
        .map(|(j, v)| match v {
            JsonValue::Null => Ok(f64::NAN),
            _ => v.as_f64().with_context(|| format!("[{j}]: not a number")),
        })
        .collect::<Result<Vec<_>>>()
        .map(Column::Float)
}
