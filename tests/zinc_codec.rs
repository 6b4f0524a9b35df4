use chrono::{NaiveDate, NaiveTime, TimeZone, Timelike};
use hsgrid::datatype::{Coordinate, Ref, Scalar, Uri};
use hsgrid::error::HaystackError;
use hsgrid::metadata::Metadata;
use hsgrid::version::Version;
use hsgrid::{zinc, Grid};

const SITES: &str = r#"ver:"3.0" database:"test" dis:"Site Energy Summary" hisStart:2020-01-01T00:00:00Z UTC
siteName dis:"Sites",val dis:"Value" unit:"kW",tags
"Site 1",356.214kW,{site area:3702ft²}
"Site 2",463.028kW,[1,"two",M]
"Site 3",,<<ver:"3.0"
a,b
1,2
>>
"#;

#[test]
fn header_and_columns() {
    let grid = zinc::parse_grid(SITES).expect("grid parses");
    assert_eq!(grid.version(), &Version::v3());
    assert_eq!(grid.metadata().get("database"), Some(&Scalar::str("test")));
    let names: Vec<&str> = grid.column_names().collect();
    assert_eq!(names, ["siteName", "val", "tags"]);
    assert_eq!(grid.columns().get("val").and_then(|m| m.get("unit")), Some(&Scalar::str("kW")));
    assert_eq!(grid.len(), 3);
}

#[test]
fn cells() {
    let grid = zinc::parse_grid(SITES).unwrap();
    assert_eq!(grid[0]["val"], Scalar::quantity(356.214, "kW"));
    let Scalar::Dict(tags) = &grid[0]["tags"] else { panic!("not a dict") };
    assert_eq!(tags["site"], Scalar::Marker);
    assert_eq!(tags["area"], Scalar::quantity(3702.0, "ft²"));
    assert_eq!(grid[1]["tags"], Scalar::List(vec![Scalar::number(1.0), Scalar::str("two"), Scalar::Marker]));
    assert!(!grid[2].contains_key("val"));
    let Scalar::Grid(inner) = &grid[2]["tags"] else { panic!("not a grid") };
    assert_eq!(inner[0]["b"], Scalar::number(2.0));
}

#[test]
fn scalars() {
    let v3 = Version::v3();
    let parse = |text: &str| zinc::parse_scalar(text, &v3).unwrap_or_else(|e| panic!("{text}: {e}"));
    assert_eq!(parse("N"), Scalar::Null);
    assert_eq!(parse("NA"), Scalar::NA);
    assert_eq!(parse("R"), Scalar::Remove);
    assert_eq!(parse("T"), Scalar::Bool(true));
    assert_eq!(parse("-12.5e2"), Scalar::number(-1250.0));
    assert_eq!(parse("1_000"), Scalar::number(1000.0));
    assert!(matches!(parse("NaN"), Scalar::Number(n) if n.value.is_nan()));
    assert_eq!(parse("-INF"), Scalar::number(f64::NEG_INFINITY));
    assert_eq!(parse("\"a\\nb \\u00e9\""), Scalar::str("a\nb é"));
    assert_eq!(parse("`http://x.org/a b`"), Scalar::Uri(Uri::new("http://x.org/a b")));
    assert_eq!(parse("@p:demo:r:1 \"Site A\""), Scalar::Ref(Ref::with_display("p:demo:r:1", "Site A")));
    assert_eq!(parse("2021-02-28"), Scalar::Date(NaiveDate::from_ymd_opt(2021, 2, 28).unwrap()));
    assert_eq!(parse("08:12"), Scalar::Time(NaiveTime::from_hms_opt(8, 12, 0).unwrap()));
    assert_eq!(parse("C(37.55,-77.45)"), Scalar::Coord(Coordinate::new(37.55, -77.45)));
    assert!(matches!(parse("Bin(\"text/plain\")"), Scalar::Bin(b) if b.0 == "text/plain"));
    assert!(matches!(parse("Bin(text/plain)"), Scalar::Bin(b) if b.0 == "text/plain"));
}

#[test]
fn datetimes_keep_their_zone() {
    let v3 = Version::v3();
    let Scalar::DateTime(dt) = zinc::parse_scalar("2021-06-01T10:30:00-04:00 New_York", &v3).unwrap() else {
        panic!("not a datetime")
    };
    assert_eq!(dt.timezone(), chrono_tz::America::New_York);
    assert_eq!(dt.naive_utc().hour(), 14);
    assert_eq!(
        zinc::dump_scalar(&Scalar::DateTime(dt), &v3).unwrap(),
        "2021-06-01T10:30:00-04:00 New_York"
    );
    let Scalar::DateTime(utc) = zinc::parse_scalar("2021-06-01T10:30:00Z", &v3).unwrap() else {
        panic!("not a datetime")
    };
    assert_eq!(utc.timezone(), chrono_tz::Tz::UTC);
}

#[test]
fn dump_reads_back() {
    let grid = zinc::parse_grid(SITES).unwrap();
    let text = zinc::dump_grid(&grid).unwrap();
    assert!(text.starts_with("ver:\"3.0\" database:\"test\""));
    let again = zinc::parse_grid(&text).unwrap();
    assert_eq!(again, grid);
}

#[test]
fn grid_without_columns() {
    let grid = Grid::with_version(Version::v3());
    let text = zinc::dump_grid(&grid).unwrap();
    assert_eq!(text, "ver:\"3.0\"\nempty\n");
    let again = zinc::parse_grid(&text).unwrap();
    assert!(again.columns().is_empty());
    assert!(again.is_empty());
}

#[test]
fn single_column_rows_keep_nulls_visible() {
    let mut grid = Grid::with_version(Version::v3());
    grid.add_column("a", Metadata::new()).unwrap();
    grid.append(Default::default()).unwrap();
    let text = zinc::dump_grid(&grid).unwrap();
    assert_eq!(text, "ver:\"3.0\"\na\nN\n");
    assert_eq!(zinc::parse_grid(&text).unwrap().len(), 1);
}

#[test]
fn several_grids() {
    let text = "ver:\"3.0\"\na\n1\n\nver:\"3.0\"\nb\n2\n3\n";
    let grids = zinc::parse_grids(text).unwrap();
    assert_eq!(grids.len(), 2);
    assert_eq!(grids[1].len(), 2);
}

#[test]
fn errors_point_at_the_failure() {
    let err = zinc::parse_grid("ver:\"3.0\"\na,b\n1,?\n").unwrap_err();
    match err {
        HaystackError::Parse { line, col, message } => {
            assert_eq!(line, Some(3));
            assert_eq!(col, Some(3));
            assert!(message.contains("1,?"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(zinc::parse_grid("a,b\n1,2\n"), Err(HaystackError::Parse { .. })));
}

#[test]
fn older_grids_refuse_newer_values() {
    let err = zinc::parse_grid("ver:\"2.0\"\na\n[1,2]\n").unwrap_err();
    assert!(matches!(err, HaystackError::Parse { line: Some(3), .. }));
    assert!(zinc::parse_scalar("NA", &Version::v2()).is_err());
    assert!(matches!(
        zinc::dump_scalar(&Scalar::List(vec![]), &Version::v2()),
        Err(HaystackError::FeatureGate { .. })
    ));
}

#[test]
fn unknown_versions_fall_back() {
    let grid = zinc::parse_grid("ver:\"2.5\"\na\n1\n").unwrap();
    assert_eq!(grid.version().to_string(), "2.5");
    assert!(zinc::parse_grid("ver:\"2.5\"\na\n[1]\n").is_err());
}

#[test]
fn smallest_grids() {
    for cell in ["@a", "\"x\"", "\"\"", "M"] {
        let grid = zinc::parse_grid(&format!("ver:\"3.0\"\nid\n{cell}\n")).unwrap();
        assert_eq!(grid.len(), 1, "{cell}");
    }
    let grid = zinc::parse_grid("ver:\"3.0\"\nid\n@a").unwrap();
    assert_eq!(grid[0]["id"], Scalar::Ref(Ref::new("a")));
    assert!(zinc::parse_grid("ver:\"3.0\"\nid\n").unwrap().is_empty());
}

#[test]
fn nested_zones_read_back() {
    let tz = chrono_tz::America::Argentina::Buenos_Aires;
    let value = Scalar::DateTime(tz.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap());
    let text = zinc::dump_scalar(&value, &Version::v3()).unwrap();
    assert_eq!(text, "2021-01-02T03:04:05-03:00 Buenos_Aires");

    let mut grid = Grid::with_version(Version::v3());
    grid.add_column("ts", Metadata::new()).unwrap();
    grid.append([("ts".to_string(), value.clone())].into_iter().collect()).unwrap();
    let again = zinc::parse_grid(&zinc::dump_grid(&grid).unwrap()).unwrap();
    assert_eq!(again, grid);

    let beulah = zinc::parse_scalar("2021-06-01T12:00:00-05:00 Beulah", &Version::v3()).unwrap();
    assert!(matches!(beulah, Scalar::DateTime(dt) if dt.timezone() == chrono_tz::America::North_Dakota::Beulah));
    let full = zinc::parse_scalar("2021-06-01T12:00:00-05:00 America/North_Dakota/Beulah", &Version::v3()).unwrap();
    assert_eq!(full, beulah);
}

#[test]
fn dicts_keep_their_tag_order() {
    let v3 = Version::v3();
    let dict = zinc::parse_scalar("{zone site area:3702ft² dis:\"Main\"}", &v3).unwrap();
    let Scalar::Dict(tags) = &dict else { panic!("not a dict") };
    assert_eq!(tags.keys().collect::<Vec<_>>(), ["zone", "site", "area", "dis"]);
    assert_eq!(zinc::dump_scalar(&dict, &v3).unwrap(), "{zone site area:3702ft² dis:\"Main\"}");
}
