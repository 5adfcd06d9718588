//! Purpose: Build configuration and the one-shot dataset builder.
//! Exports: `BuildSpec`, `ColumnSpec`, `GeoSpec`, `NgramSpec`, `RimBuilder`.
//! Role: Validates a build request up front, collects rows, then seals body and indexes.
//! Invariants: Every spec error (unknown column, wrong column type, unknown tag,
//!   unavailable codec) is reported before any row is accepted.
//! Invariants: Rows are fully coerced before they are stored; a rejected row leaves no trace.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::rim::Rim;
use crate::api::source::RowSource;
use crate::core::body::{BodyBuilder, ColumnDef, append_row};
use crate::core::codec::{Compression, codec_for};
use crate::core::container::Dataset;
use crate::core::error::{Error, ErrorKind};
use crate::core::index::geo::GeoIndex;
use crate::core::index::ngram::{NgramIndex, check_ngram_length};
use crate::core::index::scalar::ScalarIndex;
use crate::core::value::{ColumnData, ColumnType, Value};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoSpec {
    pub lat: String,
    pub lon: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NgramSpec {
    pub column: String,
    pub n: u8,
}

/// Everything needed to build one container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub geo: Vec<GeoSpec>,
    #[serde(default)]
    pub ngrams: Vec<NgramSpec>,
    #[serde(default)]
    pub compression: Compression,
}

impl BuildSpec {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Argument)
                .with_message(format!("invalid build spec: {err}"))
                .with_source(err)
        })
    }

    pub fn column(mut self, name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            type_tag: type_tag.into(),
        });
        self
    }

    pub fn index(mut self, column: impl Into<String>) -> Self {
        self.indexes.push(column.into());
        self
    }

    pub fn geo(mut self, lat: impl Into<String>, lon: impl Into<String>) -> Self {
        self.geo.push(GeoSpec {
            lat: lat.into(),
            lon: lon.into(),
        });
        self
    }

    pub fn ngram(mut self, column: impl Into<String>, n: u8) -> Self {
        self.ngrams.push(NgramSpec {
            column: column.into(),
            n,
        });
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn column_defs(&self) -> Result<Vec<ColumnDef>, Error> {
        self.columns
            .iter()
            .map(|spec| {
                let ty = spec
                    .type_tag
                    .parse::<ColumnType>()
                    .map_err(|err| err.with_column(spec.name.clone()))?;
                Ok(ColumnDef::new(spec.name.clone(), ty))
            })
            .collect()
    }
}

struct Plan {
    scalar: Vec<usize>,
    geo: Vec<(usize, usize)>,
    ngram: Vec<(usize, u8)>,
}

fn missing_column(name: &str) -> Error {
    Error::new(ErrorKind::Argument)
        .with_message("missing required column")
        .with_column(name.to_string())
        .with_hint("Index and geo columns must be declared in `columns`.")
}

fn plan(spec: &BuildSpec, columns: &[ColumnDef]) -> Result<Plan, Error> {
    if columns.is_empty() {
        return Err(Error::new(ErrorKind::Argument).with_message("build spec declares no columns"));
    }
    for (at, def) in columns.iter().enumerate() {
        if def.name.is_empty() || columns[..at].iter().any(|prior| prior.name == def.name) {
            return Err(Error::new(ErrorKind::Argument)
                .with_message("column names must be unique and non-empty")
                .with_column(def.name.clone()));
        }
    }
    let ordinal = |name: &str| {
        columns
            .iter()
            .position(|def| def.name == name)
            .ok_or_else(|| missing_column(name))
    };

    let mut scalar = Vec::with_capacity(spec.indexes.len());
    for name in &spec.indexes {
        let column = ordinal(name)?;
        if scalar.contains(&column) {
            return Err(Error::new(ErrorKind::Argument)
                .with_message("column indexed twice")
                .with_column(name.clone()));
        }
        scalar.push(column);
    }

    let mut geo = Vec::with_capacity(spec.geo.len());
    for pair in &spec.geo {
        let (lat, lon) = (ordinal(&pair.lat)?, ordinal(&pair.lon)?);
        for column in [lat, lon] {
            let def = &columns[column];
            if !def.column_type.is_floating() {
                return Err(Error::new(ErrorKind::Argument)
                    .with_message(format!("geo column must be float or double, got {}", def.column_type))
                    .with_column(def.name.clone()));
            }
        }
        if lat == lon {
            return Err(Error::new(ErrorKind::Argument)
                .with_message("geo latitude and longitude must be different columns")
                .with_column(pair.lat.clone()));
        }
        geo.push((lat, lon));
    }

    let mut ngram = Vec::with_capacity(spec.ngrams.len());
    for entry in &spec.ngrams {
        let column = ordinal(&entry.column)?;
        let def = &columns[column];
        if def.column_type != ColumnType::String {
            return Err(Error::new(ErrorKind::Argument)
                .with_message(format!("n-gram column must be string, got {}", def.column_type))
                .with_column(def.name.clone()));
        }
        check_ngram_length(entry.n).map_err(|err| err.with_column(def.name.clone()))?;
        ngram.push((column, entry.n));
    }
    Ok(Plan { scalar, geo, ngram })
}

/// Collects rows for a `BuildSpec`, then seals them into a `Rim`.
pub struct RimBuilder {
    columns: Vec<ColumnDef>,
    data: Vec<ColumnData>,
    plan: Plan,
    compression: Compression,
    rows: usize,
}

impl RimBuilder {
    pub fn new(spec: &BuildSpec) -> Result<Self, Error> {
        let columns = spec.column_defs()?;
        let plan = plan(spec, &columns)?;
        // Fails now with UnsupportedCodec rather than after ingest.
        codec_for(spec.compression)?;
        let data = columns
            .iter()
            .map(|def| ColumnData::with_capacity(def.column_type, 0))
            .collect();
        Ok(Self {
            columns,
            data,
            plan,
            compression: spec.compression,
            rows: 0,
        })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn push_row(&mut self, values: &[Value]) -> Result<(), Error> {
        append_row(&self.columns, &mut self.data, values, self.rows)?;
        self.rows += 1;
        Ok(())
    }

    /// Drain `source`, returning the number of rows taken from it.
    pub fn ingest(&mut self, source: &mut dyn RowSource) -> Result<usize, Error> {
        let before = self.rows;
        while let Some(row) = source.next_row(&self.columns) {
            self.push_row(&row?)?;
        }
        debug!(rows = self.rows - before, "ingested rows");
        Ok(self.rows - before)
    }

    pub fn finish(self) -> Result<Rim, Error> {
        let mut body = BodyBuilder::new(self.columns, self.rows)?;
        for (ordinal, data) in self.data.into_iter().enumerate() {
            body.set_column(ordinal, data)?;
        }
        let body = body.fix()?;
        let column = |ordinal: usize| {
            body.column_data(ordinal)
                .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("planned column vanished"))
        };

        let scalar = self
            .plan
            .scalar
            .iter()
            .map(|&ordinal| ScalarIndex::build(ordinal, column(ordinal)?))
            .collect::<Result<Vec<_>, _>>()?;
        let geo = self
            .plan
            .geo
            .iter()
            .map(|&(lat, lon)| GeoIndex::build(lat, column(lat)?, lon, column(lon)?))
            .collect::<Result<Vec<_>, _>>()?;
        let ngram = self
            .plan
            .ngram
            .iter()
            .map(|&(ordinal, n)| NgramIndex::build(ordinal, n, column(ordinal)?))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            rows = body.row_count(),
            general = scalar.len(),
            geo = geo.len(),
            ngram = ngram.len(),
            "sealed dataset"
        );
        Ok(Rim::from_dataset(
            Dataset { body, scalar, geo, ngram },
            self.compression,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildSpec, RimBuilder};
    use crate::api::source::VecRowSource;
    use crate::core::codec::Compression;
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;

    fn places() -> BuildSpec {
        BuildSpec::default()
            .column("name", "string")
            .column("lat", "double")
            .column("lon", "double")
            .column("pop", "int")
            .index("pop")
            .geo("lat", "lon")
            .ngram("name", 2)
            .compression(Compression::None)
    }

    #[test]
    fn spec_parses_from_json() {
        let spec = BuildSpec::from_json(
            r#"{
                "columns": [{"name": "id", "type": "int"}, {"name": "at", "type": "date"}],
                "indexes": ["id"],
                "compression": {"codec": "zstd", "level": 9}
            }"#,
        )
        .expect("spec");
        assert_eq!(spec.columns.len(), 2);
        assert_eq!(spec.compression, Compression::Zstd { level: 9 });
        assert!(spec.geo.is_empty());

        let err = BuildSpec::from_json(r#"{"columns": [], "extra": 1}"#).expect_err("unknown field");
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn validation_errors() {
        let cases = [
            BuildSpec::default().column("a", "int").index("b"),
            BuildSpec::default().column("a", "decimal"),
            BuildSpec::default().column("a", "int").column("b", "double").geo("a", "b"),
            BuildSpec::default().column("a", "int").ngram("a", 2),
            BuildSpec::default().column("a", "string").ngram("a", 5),
            BuildSpec::default().column("a", "int").index("a").index("a"),
            BuildSpec::default(),
        ];
        for spec in cases {
            let err = RimBuilder::new(&spec).err().map(|err| err.kind());
            assert_eq!(err, Some(ErrorKind::Argument), "{spec:?}");
        }
    }

    #[test]
    fn builds_all_index_kinds() {
        let mut builder = RimBuilder::new(&places()).expect("builder");
        let mut rows = VecRowSource::new(vec![
            vec![Value::str("tokyo"), Value::Double(35.68), Value::Double(139.77), Value::Int(14_000_000)],
            vec![Value::str("kyoto"), Value::Double(35.01), Value::Double(135.77), Value::Int(1_460_000)],
            vec![Value::Null, Value::Null, Value::Null, Value::Null],
        ]);
        assert_eq!(builder.ingest(&mut rows).expect("ingest"), 3);
        let rim = builder.finish().expect("finish");
        assert_eq!(rim.row_count(), 3);
        let info = rim.info();
        assert_eq!(info.indexes.general.len(), 1);
        assert_eq!(info.indexes.geo.len(), 1);
        assert_eq!(info.indexes.ngram.len(), 1);
    }

    #[test]
    fn rejected_rows_leave_no_partial_state() {
        let mut builder = RimBuilder::new(&places()).expect("builder");
        let err = builder
            .push_row(&[Value::str("x"), Value::Double(1.0), Value::Double(2.0), Value::Long(1 << 40)])
            .expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.column(), Some("pop"));
        assert_eq!(builder.row_count(), 0);
        let rim = builder.finish().expect("finish");
        assert_eq!(rim.row_count(), 0);
    }
}
