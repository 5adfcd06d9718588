//! Purpose: Hold top-level CLI command dispatch for `rim`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Helpers in `main.rs` own argument interpretation and output envelopes.

use super::*;

use rim::api::{JsonlRowSource, RimBuilder, precise_distance};

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "rim", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Build {
            output,
            input,
            spec,
            columns,
            indexes,
            geo,
            ngrams,
            compression,
        } => {
            let spec = build_spec(spec.as_deref(), &columns, &indexes, &geo, &ngrams, compression)?;
            let mut builder = RimBuilder::new(&spec)?;
            let reader = open_input(input.as_deref())?;
            let mut source = JsonlRowSource::new(reader);
            builder.ingest(&mut source)?;
            let rim = builder.finish()?;
            let stats = rim.save(&output, spec.compression)?;
            emit_json(
                json!({
                    "path": output.display().to_string(),
                    "rows": rim.row_count(),
                    "bytes": stats.bytes,
                    "chunks": stats.chunks,
                    "compressed_chunks": stats.compressed_chunks,
                    "codec": spec.compression.to_string(),
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::Info { file } => {
            let rim = Rim::open(&file)?;
            let mut value = serde_json::to_value(rim.info()).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode container info")
                    .with_source(err)
            })?;
            if let Json::Object(map) = &mut value {
                map.insert("path".to_string(), json!(file.display().to_string()));
                map.insert("sha256".to_string(), json!(file_sha256(&file)?));
            }
            emit_json(value, color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Get { file, row } => {
            let rim = Rim::open(&file)?;
            let row = rim.row(row)?;
            emit_json(row_json(&row), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Query {
            file,
            column,
            op,
            values,
            not,
            desc,
            limit,
        } => {
            let rim = Rim::open(&file)?;
            let ordinal = rim.body().resolve(column.as_str())?;
            let ty = rim.columns()[ordinal].column_type;
            let predicate = build_predicate(op, &values, ty)?;
            let selection = rim.select(ordinal, &predicate, not, order_of(desc))?;
            for id in selection.take(limit.unwrap_or(usize::MAX)) {
                emit_line(&row_json(&rim.row(id)?));
            }
            Ok(RunOutcome::ok())
        }
        Command::Near {
            file,
            lat,
            lon,
            radius,
            geo,
            nearest,
            precise,
            limit,
        } => {
            let rim = Rim::open(&file)?;
            let (lat_column, lon_column) = geo_columns(&rim, geo.as_deref())?;
            let hits = rim.search_radius(
                lat_column.as_str(),
                lon_column.as_str(),
                lat,
                lon,
                radius,
                geo_order(nearest),
            )?;
            let mut emitted = 0usize;
            for hit in hits {
                if emitted >= limit.unwrap_or(usize::MAX) {
                    break;
                }
                let row = rim.row(hit.row_id)?;
                let mut value = row_json(&row);
                value["distance_m"] = json!(hit.distance_m);
                if let Some(ellipsoid) = precise {
                    let point = (
                        row.get(lat_column.as_str()).and_then(|v| v.as_f64()),
                        row.get(lon_column.as_str()).and_then(|v| v.as_f64()),
                    );
                    let (Some(row_lat), Some(row_lon)) = point else {
                        continue;
                    };
                    let distance = precise_distance(lat, lon, row_lat, row_lon, ellipsoid.into());
                    if distance > radius {
                        continue;
                    }
                    value["precise_m"] = json!(distance);
                }
                emit_line(&value);
                emitted += 1;
            }
            Ok(RunOutcome::ok())
        }
        Command::Grep {
            file,
            column,
            query,
            distinct,
            desc,
            limit,
        } => {
            let rim = Rim::open(&file)?;
            let hits = rim.text_search(column.as_str(), &query, order_of(desc), line_mode(distinct))?;
            for hit in hits.take(limit.unwrap_or(usize::MAX)) {
                let mut value = row_json(&rim.row(hit.row_id)?);
                value["position"] = json!(hit.position);
                emit_line(&value);
            }
            Ok(RunOutcome::ok())
        }
    }
}
