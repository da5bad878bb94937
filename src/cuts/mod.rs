//! Cut engine: named masks, their combination, and selection of observables.
//!
//! Architecture:
//! ```text
//!   generators ──► CutRegistry::register_with ──► CutCache (run/namespace/cut.json)
//!                        │
//!                        ▼
//!                  Cut (name, priority, Mask)
//!                        │ combined / exclude
//!                        ▼
//!   Selection ──► resolve / apply ──► filtered observable
//! ```
//!
//! `TrackCuts` works in track space, `DutCuts` in the cluster space of the
//! device plane and borrows the track quality cut from a shared `TrackCuts`.

pub mod cache;
pub mod cut;
pub mod dut;
pub mod generators;
pub mod registry;
pub mod selection;
pub mod track;

pub use cut::Cut;
pub use dut::DutCuts;
pub use registry::{CutRegistry, CutSummary, FIDUCIAL};
pub use selection::Selection;
pub use track::TrackCuts;
