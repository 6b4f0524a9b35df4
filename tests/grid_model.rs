use hsgrid::datatype::{Entity, Ref, Scalar};
use hsgrid::error::HaystackError;
use hsgrid::metadata::{Metadata, Position};
use hsgrid::version::Version;
use hsgrid::Grid;

fn row(tags: &[(&str, Scalar)]) -> Entity {
    tags.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn pinned_grids_refuse_newer_values() {
    let mut grid = Grid::with_version(Version::v2());
    grid.add_column("a", Metadata::new()).unwrap();
    for value in [
        Scalar::NA,
        Scalar::List(vec![]),
        Scalar::Dict(Entity::new()),
        Scalar::Grid(Box::new(Grid::new())),
    ] {
        let err = grid.append(row(&[("a", value)])).unwrap_err();
        assert!(matches!(err, HaystackError::FeatureGate { .. }));
    }
    assert!(grid.set_meta("x", Scalar::NA).is_err());
    assert!(grid.is_empty());
    assert_eq!(grid.version(), &Version::v2());
}

#[test]
fn inferred_grids_upgrade() {
    let mut grid = Grid::new();
    assert_eq!(grid.version(), &Version::v2());
    grid.append(row(&[("a", Scalar::number(1.0))])).unwrap();
    assert_eq!(grid.version(), &Version::v2());
    grid.append(row(&[("a", Scalar::List(vec![Scalar::Marker]))])).unwrap();
    assert_eq!(grid.version(), &Version::v3());
}

#[test]
fn versions_compare_by_number_then_text() {
    let v = |s: &str| s.parse::<Version>().unwrap();
    assert_eq!(v("2.0"), v("2.0.0"));
    assert!(v("2.0") < v("2.0a"));
    assert!(v("2.0a") < v("2.0b"));
    assert!(v("2.0b") < v("3.0"));
    assert_eq!(v("2.9").nearest(), Version::v2());
    assert_eq!(v("1.0").nearest(), Version::v2());
    assert_eq!(v("4.0").nearest(), Version::v3());
    assert!("x.y".parse::<Version>().is_err());
}

#[test]
fn columns_keep_their_order() {
    let mut grid = Grid::new();
    grid.add_column("b", Metadata::new()).unwrap();
    grid.add_column("d", Metadata::new()).unwrap();
    grid.add_column_at("a", Metadata::new(), Position::Start).unwrap();
    grid.add_column_at("c", Metadata::new(), Position::After("b")).unwrap();
    let names: Vec<&str> = grid.column_names().collect();
    assert_eq!(names, ["a", "b", "c", "d"]);
    assert!(matches!(grid.add_column("a", Metadata::new()), Err(HaystackError::DuplicateKey(_))));
    grid.set_column_meta("c", "unit", Scalar::str("kW")).unwrap();
    assert!(grid.set_column_meta("zz", "unit", Scalar::Marker).is_err());
}

#[test]
fn select_and_purge() {
    let mut grid = Grid::new();
    for name in ["id", "dis", "area"] {
        grid.add_column(name, Metadata::new()).unwrap();
    }
    grid.append(row(&[
        ("id", Scalar::Ref(Ref::new("a"))),
        ("dis", Scalar::str("A")),
        ("area", Scalar::number(3.0)),
        ("extra", Scalar::Marker),
    ]))
    .unwrap();

    let kept = grid.select("id, area").unwrap();
    assert_eq!(kept.column_names().collect::<Vec<_>>(), ["id", "area"]);
    let dropped = grid.select("!dis").unwrap();
    assert_eq!(dropped.column_names().collect::<Vec<_>>(), ["id", "area"]);
    assert!(grid.select("id,!dis").is_err());
    assert_eq!(grid.select("*").unwrap(), grid);

    let purged = kept.purge();
    assert_eq!(purged[0].len(), 2);
    assert!(!purged[0].contains_key("extra"));
}

#[test]
fn pack_and_extend_columns() {
    let mut grid = Grid::new();
    grid.add_column("unused", Metadata::new()).unwrap();
    grid.append(row(&[("a", Scalar::Marker)])).unwrap();
    grid.append(row(&[("b", Scalar::Marker)])).unwrap();
    grid.extend_columns();
    grid.pack_columns();
    assert_eq!(grid.column_names().collect::<Vec<_>>(), ["a", "b"]);
}

#[test]
fn sorting_and_ids() {
    let mut grid = Grid::new();
    for (id, value) in [("c", 3.0), ("a", 1.0), ("b", 2.0)] {
        grid.append(row(&[("id", Scalar::Ref(Ref::new(id))), ("v", Scalar::number(value))])).unwrap();
    }
    grid.append(row(&[("v", Scalar::str("no id"))])).unwrap();
    grid.sort_by_tag("v");
    let ids: Vec<&str> = grid.ids().map(|r| r.name.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(grid.position_of(&Ref::new("a")), Some(0));
    assert_eq!(grid.pop(0).map(|r| r["v"].clone()), Some(Scalar::number(1.0)));
    assert_eq!(grid.position_of(&Ref::new("c")), Some(1));
}

#[test]
fn equality_tolerates_order_and_rounding() {
    let mut left = Grid::new();
    left.append(row(&[("id", Scalar::Ref(Ref::new("a"))), ("v", Scalar::number(1.0))])).unwrap();
    left.append(row(&[("v", Scalar::number(2.0))])).unwrap();
    let mut right = Grid::new();
    right.append(row(&[("v", Scalar::number(2.0000001))])).unwrap();
    right.append(row(&[("id", Scalar::Ref(Ref::with_display("a", "A"))), ("v", Scalar::number(1.0))])).unwrap();
    assert_eq!(left, right);
    right.row_mut(0).unwrap().insert("v".to_string(), Scalar::number(2.1));
    assert_ne!(left, right);
}
