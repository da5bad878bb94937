//! Cut engine for pixel test-beam analysis.
//!
//! A run is read into a columnar store ([`data`]), its event, track and
//! per-plane cluster index spaces are derived ([`space`], [`run`]), and named
//! cuts are registered and combined over them ([`cuts`]). [`analysis`] puts the
//! pieces together for one device under test.

pub mod analysis;
pub mod config;
pub mod cuts;
pub mod data;
pub mod error;
pub mod run;
pub mod space;
