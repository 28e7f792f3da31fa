//! Core data models for the bucket console.
//!
//! `Bucket` and `ObjectEntry` mirror what the object store owns; the
//! browser and stats types are derived views that serialize as JSON via
//! `serde`.

pub mod browser;
pub mod bucket;
pub mod object;
pub mod stats;
