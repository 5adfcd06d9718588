// End-to-end query scenarios through the public API, including a save/load hop.
use rim::api::{
    BuildSpec, Compression, ErrorKind, GeoOrder, JsonlRowSource, LineMode, Order, Predicate, Rim,
    RimBuilder, Value,
};

fn reload(rim: &Rim) -> Rim {
    let mut buf = Vec::new();
    rim.save_to(&mut buf, Compression::None).expect("save");
    Rim::load(buf.as_slice()).expect("load")
}

fn build(spec: &BuildSpec, jsonl: &str) -> Rim {
    let mut builder = RimBuilder::new(spec).expect("builder");
    builder
        .ingest(&mut JsonlRowSource::new(jsonl.as_bytes()))
        .expect("ingest");
    reload(&builder.finish().expect("finish"))
}

fn ids(rim: &Rim, rows: impl Iterator<Item = u32>) -> Vec<i32> {
    rows.map(|row| match rim.row(row).expect("row").get("id") {
        Some(Value::Int(id)) => id,
        other => panic!("unexpected id {other:?}"),
    })
    .collect()
}

#[test]
fn scalar_index_scenario() {
    let spec = BuildSpec::default()
        .column("id", "int")
        .column("name", "string")
        .column("score", "double")
        .index("id");
    let rim = build(
        &spec,
        r#"[1, "ann", 1.5]
[2, "bob", 2.5]
[3, "cy", 3.5]
[4, "dee", 4.5]
[5, "eve", 5.5]
"#,
    );

    let eq: Vec<u32> = rim
        .select("id", &Predicate::Eq(Value::Int(3)), false, Order::Asc)
        .expect("eq")
        .collect();
    assert_eq!(eq, vec![2]);

    let between = rim
        .select("id", &Predicate::Between(Value::Int(2), Value::Int(4)), false, Order::Asc)
        .expect("between");
    assert_eq!(ids(&rim, between), vec![2, 3, 4]);

    let members = rim
        .select(
            "id",
            &Predicate::In(vec![Value::Int(10), Value::Int(2), Value::Int(4)]),
            false,
            Order::Asc,
        )
        .expect("in");
    assert_eq!(ids(&rim, members), vec![2, 4]);

    let outside = rim
        .select("id", &Predicate::Between(Value::Int(2), Value::Int(4)), true, Order::Desc)
        .expect("not between");
    assert_eq!(ids(&rim, outside), vec![5, 1]);

    let err = rim
        .select("missing", &Predicate::Eq(Value::Int(1)), false, Order::Asc)
        .err()
        .map(|err| err.kind());
    assert_eq!(err, Some(ErrorKind::Argument));
}

#[test]
fn geo_radius_scenario() {
    let spec = BuildSpec::default()
        .column("lat", "double")
        .column("lon", "double")
        .geo("lat", "lon");
    // The second point sits roughly 50 m north of the first.
    let rim = build(
        &spec,
        r#"{"lat": 35.681236, "lon": 139.767125}
{"lat": 35.681686, "lon": 139.767125}
{"lat": null, "lon": 139.0}
"#,
    );

    let hits: Vec<u32> = rim
        .search_radius("lat", "lon", 35.681_236, 139.767_125, 1.0, GeoOrder::Unsorted)
        .expect("radius")
        .map(|hit| hit.row_id)
        .collect();
    assert_eq!(hits, vec![0]);

    let none = rim
        .search_radius("lat", "lon", 35.681_686, 139.767_125, 0.0, GeoOrder::Unsorted)
        .expect("radius")
        .filter(|hit| hit.row_id == 0)
        .count();
    assert_eq!(none, 0);

    let both: Vec<u32> = rim
        .search_radius("lat", "lon", 35.681_236, 139.767_125, 100.0, GeoOrder::Nearest)
        .expect("radius")
        .map(|hit| hit.row_id)
        .collect();
    assert_eq!(both, vec![0, 1]);
}

#[test]
fn ngram_scenario() {
    let spec = BuildSpec::default().column("name", "string").ngram("name", 2);
    let rim = build(&spec, "[\"abcabc\"]\n");

    let distinct: Vec<(u32, u32)> = rim
        .text_search("name", "abc", Order::Asc, LineMode::Distinct)
        .expect("search")
        .map(|hit| (hit.row_id, hit.position))
        .collect();
    assert_eq!(distinct, vec![(0, 0)]);

    let all: Vec<(u32, u32)> = rim
        .text_search("name", "abc", Order::Asc, LineMode::All)
        .expect("search")
        .map(|hit| (hit.row_id, hit.position))
        .collect();
    assert_eq!(all, vec![(0, 0), (0, 3)]);

    let backwards: Vec<u32> = rim
        .text_search("name", "abc", Order::Desc, LineMode::All)
        .expect("search")
        .map(|hit| hit.position)
        .collect();
    assert_eq!(backwards, vec![3, 0]);
}

#[test]
fn build_rejects_unavailable_or_invalid_configuration() {
    let bad_geo = BuildSpec::default()
        .column("lat", "int")
        .column("lon", "double")
        .geo("lat", "lon");
    assert_eq!(
        RimBuilder::new(&bad_geo).err().map(|err| err.kind()),
        Some(ErrorKind::Argument)
    );

    let missing = BuildSpec::default().column("a", "int").ngram("b", 2);
    assert_eq!(
        RimBuilder::new(&missing).err().map(|err| err.kind()),
        Some(ErrorKind::Argument)
    );

    if !cfg!(feature = "zstd") {
        let zstd = BuildSpec::default()
            .column("a", "int")
            .compression(Compression::Zstd { level: 3 });
        assert_eq!(
            RimBuilder::new(&zstd).err().map(|err| err.kind()),
            Some(ErrorKind::UnsupportedCodec)
        );
    }
}
