//! Clap argument blocks shared by more than one binary in this workspace, so
//! flags like `--db`/`--volumes`/`--replicas` are declared once and flattened
//! wherever they're needed instead of being redeclared per binary.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

pub mod cluster;

pub use cluster::ClusterConfig;
