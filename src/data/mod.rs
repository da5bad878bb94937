/// Data layer: run store, loading, and mask predicates.
///
/// Architecture:
/// ```text
///  run dir (parquet / csv tables) / .json
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse files → ColumnStore
///   └──────────┘
///        │
///        ▼
///   ┌─────────────┐
///   │ ColumnStore  │  group → field → Column
///   └─────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  column predicates → Mask
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
