use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CutError, CutResult};

// ---------------------------------------------------------------------------
// Column – one field of a group
// ---------------------------------------------------------------------------

/// A typed column as it comes out of the converter.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Integer(Vec<i64>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Integer(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Column::Float(_) => "float",
            Column::Integer(_) => "integer",
            Column::Bool(_) => "bool",
        }
    }

    /// Numeric view; integers are widened.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Column::Float(v) => Some(v.clone()),
            Column::Integer(v) => Some(v.iter().map(|&i| i as f64).collect()),
            Column::Bool(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Column::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Append another chunk of the same type (multi-batch files).
    pub(crate) fn extend(&mut self, other: Column) -> bool {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend(b),
            (Column::Integer(a), Column::Integer(b)) => a.extend(b),
            (Column::Bool(a), Column::Bool(b)) => a.extend(b),
            _ => return false,
        }
        true
    }
}

// ---------------------------------------------------------------------------
// ColumnStore – grouped fields of one run
// ---------------------------------------------------------------------------

/// Read-only columnar store: group path (`"Plane2/Clusters"`) → field → column.
#[derive(Debug, Clone, Default)]
pub struct ColumnStore {
    groups: BTreeMap<String, BTreeMap<String, Column>>,
}

impl ColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by the loaders and by tests.
    pub fn with_field(mut self, group: &str, field: &str, column: Column) -> Self {
        self.insert(group, field, column);
        self
    }

    pub(crate) fn insert(&mut self, group: &str, field: &str, column: Column) {
        self.groups
            .entry(group.trim_matches('/').to_string())
            .or_default()
            .insert(field.to_string(), column);
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn column(&self, group: &str, field: &str) -> CutResult<&Column> {
        self.groups
            .get(group)
            .and_then(|fields| fields.get(field))
            .ok_or_else(|| CutError::MissingField {
                group: group.to_string(),
                field: field.to_string(),
            })
    }

    pub fn f64s(&self, group: &str, field: &str) -> CutResult<Vec<f64>> {
        self.column(group, field)?
            .to_f64()
            .ok_or_else(|| CutError::FieldType {
                group: group.to_string(),
                field: field.to_string(),
                expected: "numeric",
            })
    }

    pub fn i64s(&self, group: &str, field: &str) -> CutResult<&[i64]> {
        self.column(group, field)?
            .as_i64()
            .ok_or_else(|| CutError::FieldType {
                group: group.to_string(),
                field: field.to_string(),
                expected: "integer",
            })
    }

    /// Non-negative integer column as indices or counts.
    pub fn indices(&self, group: &str, field: &str) -> CutResult<Vec<usize>> {
        self.i64s(group, field)?
            .iter()
            .map(|&v| {
                usize::try_from(v).map_err(|_| {
                    CutError::Layout(format!("negative value {v} in {group}/{field}"))
                })
            })
            .collect()
    }

    /// Index column in which a negative entry means "no partner".
    pub fn links(&self, group: &str, field: &str) -> CutResult<Vec<Option<usize>>> {
        Ok(self
            .i64s(group, field)?
            .iter()
            .map(|&v| usize::try_from(v).ok())
            .collect())
    }

    /// Tree view of the store, like `h5ls -r`.
    pub fn structure(&self) -> String {
        let mut out = String::from(".\n");
        for (group, fields) in &self.groups {
            out.push_str(&format!("├── {group}\n"));
            for (field, column) in fields {
                out.push_str(&format!(
                    "│   ├── {field} [{} × {}]\n",
                    column.len(),
                    column.dtype()
                ));
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// DataIdentity – what a cached cut was computed from
// ---------------------------------------------------------------------------

/// Identity of the data behind a run; cached cuts are only valid for an
/// identical identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIdentity {
    pub run: u32,
    /// Total size of the store files in bytes.
    pub bytes: u64,
    /// Newest modification time of the store files, seconds since the epoch.
    pub modified: u64,
}

impl DataIdentity {
    /// Identity of a store that does not live on disk.
    pub fn in_memory(run: u32) -> Self {
        Self {
            run,
            bytes: 0,
            modified: 0,
        }
    }
}

impl fmt::Display for DataIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} ({} B, mtime {})", self.run, self.bytes, self.modified)
    }
}
