//! Run output documents.
//!
//! # Submodules
//!
//! - [`json`]: one JSON document per run, grouped by date, readable back for re-upload
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! ├── 2025-05-06/
//! │   ├── 080000.json
//! │   ├── 120000.json
//! │   └── 160000.json
//! ```

pub mod json;

pub use json::{RunOutput, read_run_output, write_run_output};
