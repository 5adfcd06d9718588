//! Purpose: Define the stable public Rust API boundary for rim.
//! Exports: The dataset facade, builder, row sources, and the query vocabulary.
//! Role: Public, additive-only surface used by the CLI and embedders.
//! Invariants: Container internals (chunk framing, index builders) stay behind `core`.

mod builder;
mod rim;
mod source;

pub use crate::core::body::{Body, ColumnDef, ColumnRef, Row};
pub use crate::core::codec::{CodecId, Compression, available_codecs};
pub use crate::core::container::ContainerStats;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::geo::{Ellipsoid, precise_distance};
pub use crate::core::index::geo::{GeoHit, GeoOrder};
pub use crate::core::index::ngram::{LineMode, NgramHit};
pub use crate::core::order::Order;
pub use crate::core::predicate::{Predicate, TextMatcher};
pub use crate::core::value::{ColumnType, Value};
pub use builder::{BuildSpec, ColumnSpec, GeoSpec, NgramSpec, RimBuilder};
pub use rim::{
    ColumnInfo, GeneralIndexInfo, GeoIndexInfo, IndexInfo, NgramIndexInfo, Rim, RimInfo, Selection,
};
pub use source::{
    DEFAULT_MAX_RECORD_BYTES, JsonlRowSource, RowSource, VecRowSource, json_to_value, value_to_json,
};
