use hsgrid::datatype::{Ref, Scalar};
use hsgrid::version::Version;
use hsgrid::{csv, zinc};

#[test]
fn spreadsheet_friendly_cells() {
    let grid = zinc::parse_grid(
        "ver:\"3.0\"\nid,dis,site,area,enabled,tags\n\
         @s1 \"Main, HQ\",\"He said \\\"hi\\\"\",M,1200ft²,T,[1,2]\n\
         @s2,\"12\",,,F,\n",
    )
    .unwrap();
    let text = csv::dump_grid(&grid).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("id,dis,site,area,enabled,tags"));
    assert_eq!(lines.next(), Some(r#""@s1 Main, HQ","He said ""hi""",✓,1200ft²,true,"[1,2]""#));
    assert_eq!(lines.next(), Some(r#"@s2,"""12""",,,false,"#));
}

#[test]
fn reads_back() {
    let grid = zinc::parse_grid(
        "ver:\"3.0\"\nid,dis,site,area,day\n\
         @s1 \"Main\",\"plain text\",M,1200ft²,2021-03-04\n\
         @s2,\"12\",,N,\n",
    )
    .unwrap();
    let again = csv::parse_grid(&csv::dump_grid(&grid).unwrap()).unwrap();
    assert_eq!(again.version(), &Version::v3());
    assert_eq!(again, grid);
    let s1 = again.get_by_id(&Ref::new("s1")).unwrap();
    assert_eq!(s1["id"], Scalar::Ref(Ref::with_display("s1", "Main")));
    assert_eq!(s1["site"], Scalar::Marker);
    let s2 = again.get_by_id(&Ref::new("s2")).unwrap();
    assert_eq!(s2["dis"], Scalar::str("12"));
    assert!(!s2.contains_key("site"));
}

#[test]
fn empty_cells_and_nulls_differ() {
    let grid = csv::parse_grid("a,b\n,N\n").unwrap();
    assert!(!grid[0].contains_key("a"));
    assert_eq!(grid[0]["b"], Scalar::Null);
    assert_eq!(csv::parse_scalar("", &Version::v3()).unwrap(), Scalar::Null);
    assert!(csv::parse_scalar("[1]", &Version::v2()).is_err());
}

#[test]
fn short_records_are_accepted() {
    let grid = csv::parse_grid("a,b,c\n1\n1,2,3\n").unwrap();
    assert_eq!(grid.len(), 2);
    assert_eq!(grid[0].len(), 1);
    assert_eq!(grid[1]["c"], Scalar::number(3.0));
}
