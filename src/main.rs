//! Purpose: `rim` CLI entry point: argument parsing, output envelopes, error reporting.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Query commands emit one compact JSON object per hit (JSON Lines).
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use rim::api::{
    BuildSpec, ColumnType, Compression, Ellipsoid, Error, ErrorKind, GeoOrder, LineMode, Order,
    Predicate, Rim, Row, Value, json_to_value, to_exit_code, value_to_json,
};
use serde_json::{Map, Value as Json, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `rim --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode).map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("RIM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "rim",
    version,
    about = "Build and query read-optimized columnar container files",
    long_about = None,
    after_help = r#"EXAMPLES
  $ rim build places.rim places.jsonl --column name:string --column lat:double \
        --column lon:double --column pop:int --index pop --geo lat,lon --ngram name:2
  $ rim info places.rim
  $ rim query places.rim pop ge 100000 --desc
  $ rim near places.rim 35.6812 139.7671 500 --nearest
  $ rim grep places.rim name kyo

  Set RIM_LOG=debug to trace container sections on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty JSON output: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum QueryOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    In,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EllipsoidCli {
    Wgs84,
    Grs80,
    Bessel,
}

impl From<EllipsoidCli> for Ellipsoid {
    fn from(value: EllipsoidCli) -> Self {
        match value {
            EllipsoidCli::Wgs84 => Ellipsoid::Wgs84,
            EllipsoidCli::Grs80 => Ellipsoid::Grs80,
            EllipsoidCli::Bessel => Ellipsoid::Bessel,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Build a container from JSON Lines",
        long_about = r#"Build a container from JSON Lines rows.

Each input line is a JSON array (values in column order) or a JSON object
(values by column name; missing keys are null). Columns and indexes come from
--spec, from flags, or both (flags append to the spec file)."#,
        after_help = r#"EXAMPLES
  $ rim build out.rim rows.jsonl --spec spec.json
  $ cat rows.jsonl | rim build out.rim --column id:int --column at:date --index id
  $ rim build out.rim rows.jsonl --spec spec.json --compression zstd:9"#
    )]
    Build {
        #[arg(help = "Container file to write", value_hint = ValueHint::FilePath)]
        output: PathBuf,
        #[arg(help = "JSON Lines input (default: stdin; `-` for stdin)", value_hint = ValueHint::FilePath)]
        input: Option<String>,
        #[arg(long, help = "Build spec JSON file", value_hint = ValueHint::FilePath)]
        spec: Option<PathBuf>,
        #[arg(long = "column", value_name = "NAME:TYPE", help = "Declare a column (repeatable)")]
        columns: Vec<String>,
        #[arg(long = "index", value_name = "COLUMN", help = "Scalar index on a column (repeatable)")]
        indexes: Vec<String>,
        #[arg(long = "geo", value_name = "LAT,LON", help = "Geo index on a column pair (repeatable)")]
        geo: Vec<String>,
        #[arg(long = "ngram", value_name = "COLUMN:N", help = "N-gram index, N in 1..=3 (repeatable)")]
        ngrams: Vec<String>,
        #[arg(
            long,
            value_name = "CODEC",
            help = "none|default|gzip|lz4|zstd[:LEVEL] (overrides --spec)"
        )]
        compression: Option<Compression>,
    },
    #[command(arg_required_else_help = true, about = "Summarize a container as JSON")]
    Info {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(arg_required_else_help = true, about = "Print one row by id")]
    Get {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        row: u32,
    },
    #[command(
        arg_required_else_help = true,
        about = "Select rows by a predicate on one column",
        long_about = r#"Select rows by a predicate on one column.

Uses the column's scalar index when the container has one and falls back to a
linear scan otherwise. Indexed results come in value order, scans in row order.
Null cells never match, with or without --not."#,
        after_help = r#"EXAMPLES
  $ rim query data.rim id eq 3
  $ rim query data.rim score between 2.5 4 --desc
  $ rim query data.rim name in ann bob --not"#
    )]
    Query {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        column: String,
        #[arg(value_enum)]
        op: QueryOp,
        #[arg(required = true, allow_negative_numbers = true, help = "Operands (JSON literals or bare text)")]
        values: Vec<String>,
        #[arg(long, help = "Invert the predicate over non-null rows")]
        not: bool,
        #[arg(long, help = "Descending order")]
        desc: bool,
        #[arg(long, short = 'n', help = "Stop after this many rows")]
        limit: Option<usize>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Rows within a radius of a point",
        after_help = r#"EXAMPLES
  $ rim near places.rim 35.681236 139.767125 1000
  $ rim near places.rim 35.681236 139.767125 1000 --geo lat,lon --nearest --precise wgs84"#
    )]
    Near {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        #[arg(help = "Radius in meters")]
        radius: f64,
        #[arg(long, value_name = "LAT,LON", help = "Geo index columns (required when there are several)")]
        geo: Option<String>,
        #[arg(long, help = "Order hits by distance")]
        nearest: bool,
        #[arg(long, value_enum, help = "Recheck hits with an ellipsoidal distance")]
        precise: Option<EllipsoidCli>,
        #[arg(long, short = 'n', help = "Stop after this many rows")]
        limit: Option<usize>,
    },
    #[command(arg_required_else_help = true, about = "Substring search through an n-gram index")]
    Grep {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        column: String,
        query: String,
        #[arg(long, help = "At most one hit per row")]
        distinct: bool,
        #[arg(long, help = "Descending order")]
        desc: bool,
        #[arg(long, short = 'n', help = "Stop after this many hits")]
        limit: Option<usize>,
    },
    #[command(arg_required_else_help = true, about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_pair<'a>(raw: &'a str, sep: char, what: &str) -> Result<(&'a str, &'a str), Error> {
    raw.split_once(sep)
        .map(|(a, b)| (a.trim(), b.trim()))
        .filter(|(a, b)| !a.is_empty() && !b.is_empty())
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid {what} `{raw}`"))
                .with_hint(format!("Expected two parts separated by `{sep}`."))
        })
}

fn build_spec(
    spec_path: Option<&Path>,
    columns: &[String],
    indexes: &[String],
    geo: &[String],
    ngrams: &[String],
    compression: Option<Compression>,
) -> Result<BuildSpec, Error> {
    let mut spec = match spec_path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read build spec")
                    .with_path(path)
                    .with_source(err)
            })?;
            BuildSpec::from_json(&text).map_err(|err| err.with_path(path))?
        }
        None => BuildSpec::default(),
    };
    for raw in columns {
        let (name, tag) = parse_pair(raw, ':', "column")?;
        spec = spec.column(name, tag);
    }
    for column in indexes {
        spec = spec.index(column.as_str());
    }
    for raw in geo {
        let (lat, lon) = parse_pair(raw, ',', "geo pair")?;
        spec = spec.geo(lat, lon);
    }
    for raw in ngrams {
        let (column, n) = parse_pair(raw, ':', "n-gram")?;
        let n = n.parse::<u8>().map_err(|_| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid n-gram length in `{raw}`"))
                .with_hint("Use COLUMN:N with N in 1..=3.")
        })?;
        spec = spec.ngram(column, n);
    }
    if let Some(compression) = compression {
        spec = spec.compression(compression);
    }
    if spec.columns.is_empty() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("no columns declared")
            .with_hint("Pass --spec FILE or at least one --column NAME:TYPE."));
    }
    Ok(spec)
}

fn open_input(path: Option<&str>) -> Result<Box<dyn BufRead>, Error> {
    match path {
        None | Some("-") => Ok(Box::new(BufReader::new(io::stdin()))),
        Some(path) => {
            let file = std::fs::File::open(path).map_err(|err| {
                let kind = if err.kind() == io::ErrorKind::NotFound {
                    ErrorKind::NotFound
                } else {
                    ErrorKind::Io
                };
                Error::new(kind)
                    .with_message("failed to read input file")
                    .with_path(path)
                    .with_source(err)
            })?;
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

fn file_sha256(path: &Path) -> Result<String, Error> {
    use sha2::{Digest, Sha256};

    let mut file = std::fs::File::open(path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}

/// Parse a CLI operand: a JSON literal when it is one, bare text otherwise.
fn parse_operand(raw: &str, ty: ColumnType) -> Result<Value, Error> {
    let cell = serde_json::from_str::<Json>(raw).unwrap_or_else(|_| Json::String(raw.to_string()));
    let value = json_to_value(&cell, ty)?;
    if value.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("operand `{raw}` is null")));
    }
    Ok(value)
}

fn build_predicate(op: QueryOp, values: &[String], ty: ColumnType) -> Result<Predicate, Error> {
    let operands = values
        .iter()
        .map(|raw| parse_operand(raw, ty))
        .collect::<Result<Vec<_>, _>>()?;
    let expected = match op {
        QueryOp::Between => Some(2),
        QueryOp::In => None,
        _ => Some(1),
    };
    match expected {
        Some(expected) if operands.len() != expected => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "{} takes {expected} operand(s), got {}",
                    format!("{op:?}").to_lowercase(),
                    operands.len()
                ))
                .with_hint("Use `in` for a list of values."));
        }
        _ => {}
    }
    let mut operands = operands.into_iter();
    let mut next = || {
        operands
            .next()
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("operand count checked"))
    };
    Ok(match op {
        QueryOp::Eq => Predicate::Eq(next()?),
        QueryOp::Gt => Predicate::Gt(next()?),
        QueryOp::Ge => Predicate::Ge(next()?),
        QueryOp::Lt => Predicate::Lt(next()?),
        QueryOp::Le => Predicate::Le(next()?),
        QueryOp::Between => Predicate::Between(next()?, next()?),
        QueryOp::In => Predicate::In(operands.collect()),
    })
}

/// Pick the geo column pair: explicit, or the only geo index in the container.
fn geo_columns(rim: &Rim, geo: Option<&str>) -> Result<(String, String), Error> {
    if let Some(raw) = geo {
        let (lat, lon) = parse_pair(raw, ',', "geo pair")?;
        return Ok((lat.to_string(), lon.to_string()));
    }
    let info = rim.info();
    match info.indexes.geo.as_slice() {
        [only] => Ok((only.lat.clone(), only.lon.clone())),
        [] => Err(Error::new(ErrorKind::Argument).with_message("container has no geo index")),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message("container has several geo indexes")
            .with_hint("Choose one with --geo LAT,LON.")),
    }
}

fn order_of(desc: bool) -> Order {
    Order::from_desc(desc)
}

fn geo_order(nearest: bool) -> GeoOrder {
    if nearest { GeoOrder::Nearest } else { GeoOrder::Unsorted }
}

fn line_mode(distinct: bool) -> LineMode {
    if distinct { LineMode::Distinct } else { LineMode::All }
}

fn row_json(row: &Row<'_>) -> Json {
    let mut data = Map::new();
    for (def, value) in row.iter() {
        data.insert(def.name.clone(), value_to_json(&value));
    }
    json!({ "row": row.id(), "data": data })
}

fn emit_json(value: Json, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    let pretty = is_tty || color_mode.use_color(is_tty);
    let json = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

/// One hit per line, always compact so output stays valid JSON Lines.
fn emit_line(value: &Json) {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::Argument => "invalid argument",
        ErrorKind::NotFound => "not found",
        ErrorKind::Format => "malformed container",
        ErrorKind::Integrity => "container integrity check failed",
        ErrorKind::Range => "value out of range",
        ErrorKind::UnsupportedCodec => "compression codec unavailable",
        ErrorKind::Io => "i/o error",
    }
    .to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Json {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(column) = err.column() {
        inner.insert("column".to_string(), json!(column));
    }
    if let Some(row) = err.row() {
        inner.insert("row".to_string(), json!(row));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Json::Object(inner));
    Json::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    let label = |name: &str| colorize_label(name, use_color, AnsiColor::Yellow);

    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", label("hint:")));
    }
    if let Some(path) = err.path() {
        lines.push(format!("{} {}", label("path:"), path.display()));
    }
    if let Some(column) = err.column() {
        lines.push(format!("{} {column}", label("column:")));
    }
    if let Some(row) = err.row() {
        lines.push(format!("{} {row}", label("row:")));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("{} {offset}", label("offset:")));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("{} {cause}", label("caused by:")));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, QueryOp, build_predicate, build_spec, error_json, error_text, parse_operand, parse_pair,
    };
    use clap::CommandFactory;
    use rim::api::{ColumnType, Compression, Error, ErrorKind, Predicate, Value};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pairs_and_operands() {
        assert_eq!(parse_pair("lat, lon", ',', "geo").expect("pair"), ("lat", "lon"));
        assert!(parse_pair("lat", ',', "geo").is_err());
        assert!(parse_pair("lat,", ',', "geo").is_err());
        assert_eq!(parse_operand("3", ColumnType::Int).expect("int"), Value::Int(3));
        assert_eq!(parse_operand("ann", ColumnType::String).expect("bare"), Value::str("ann"));
        assert_eq!(parse_operand("\"7\"", ColumnType::String).expect("quoted"), Value::str("7"));
        assert!(parse_operand("null", ColumnType::Int).is_err());
    }

    #[test]
    fn predicate_arity() {
        let values = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let between = build_predicate(QueryOp::Between, &values(&["4", "2"]), ColumnType::Int).expect("between");
        assert!(matches!(between, Predicate::Between(Value::Int(4), Value::Int(2))));
        let err = build_predicate(QueryOp::Eq, &values(&["1", "2"]), ColumnType::Int).expect_err("arity");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let list = build_predicate(QueryOp::In, &values(&["1", "2", "3"]), ColumnType::Long).expect("in");
        assert!(matches!(list, Predicate::In(items) if items.len() == 3));
    }

    #[test]
    fn spec_from_flags() {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let spec = build_spec(
            None,
            &strings(&["id:int", "lat:double", "lon:double", "name:string"]),
            &strings(&["id"]),
            &strings(&["lat,lon"]),
            &strings(&["name:2"]),
            Some(Compression::Lz4),
        )
        .expect("spec");
        assert_eq!(spec.columns.len(), 4);
        assert_eq!(spec.ngrams[0].n, 2);
        assert_eq!(spec.compression, Compression::Lz4);

        let err = build_spec(None, &[], &[], &[], &[], None).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = build_spec(None, &strings(&["a:int"]), &[], &[], &strings(&["a:x"]), None).expect_err("n");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_envelope_fields() {
        let err = Error::new(ErrorKind::Argument)
            .with_message("unknown column")
            .with_column("nope")
            .with_hint("Check `rim info`.")
            .with_source(std::io::Error::other("boom"));
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Argument");
        assert_eq!(value["error"]["column"], "nope");
        assert_eq!(value["error"]["causes"][0], "boom");

        let text = error_text(&err, false);
        assert!(text.starts_with("error: unknown column"));
        assert!(text.contains("hint: Check `rim info`."));
        assert!(text.contains("caused by: boom"));
    }
}
