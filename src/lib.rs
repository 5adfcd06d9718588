//! Purpose: Library crate behind the `rim` CLI: a read-optimized columnar container.
//! Exports: `api` (dataset facade, builder, row sources), `core` (format, indexes, errors).
//! Role: Datasets are built once, sealed into a single file, then loaded for queries.
//! Invariants: Sealed datasets are immutable; queries never write.
//! Invariants: Library code reports failures as `core::error::Error`, never by panicking.
pub mod api;
pub mod core;
