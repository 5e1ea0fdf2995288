//! `bwscan` CLI surface: `scan`, `list`, `aggregate`. Gated behind the
//! `cli` feature so the library itself stays free of
//! clap/file-rotate/directories for embedders that only want the scanning
//! logic.

pub mod aggregate;
pub mod list;
pub mod logging;
pub mod scan;
