use chrono::{DateTime, TimeZone, Utc};
use hsgrid::sql::{create_table, sql_filter_for, SqlDialect, MAX_DATE};
use hsgrid::version::Version;
use hsgrid::{json, zinc, Entity, Scalar};
use rusqlite::{params, Connection};

const CURRENT: &str = r#"ver:"3.0"
id,dis,site,equip,point,siteRef,equipRef,geoCity,area,curVal,enabled,installed
@s1,"HQ",M,,,,,"Paris",1200ft²,,,2015-06-01
@s2,"Depot",M,,,,,"Lyon",800ft²,,,2019-01-15
@e1,"AHU-1",,M,,@s1 "HQ",,,,,T,
@e2,"AHU-2",,M,,@s2,,,,,F,
@p1,"Temp",,,M,@s1,@e1,,,21.5°C,,
@p2,"Power",,,M,@s1,@e1,,,12kW,,
@p3,"Flow",,,M,@s2,@e2,,,4.2,,
"#;

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

fn insert(conn: &Connection, customer: &str, row: &Entity, start: &str, end: &str) {
    let Some(Scalar::Ref(id)) = row.get("id") else { panic!("row without id") };
    conn.execute(
        "INSERT INTO haystack VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id.name, customer, start, end, json::dump_entity(row, &Version::v3()).unwrap()],
    )
    .unwrap();
}

/// The current rows, an older version of `s1` that was in Lyon, and a row
/// of another customer.
fn database() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&create_table(SqlDialect::Sqlite, "haystack")).unwrap();
    let grid = zinc::parse_grid(CURRENT).unwrap();
    for row in grid.iter() {
        let start = if row["id"] == Scalar::Ref(hsgrid::datatype::Ref::new("s1")) {
            "2023-06-01T00:00:00+00:00"
        } else {
            "2010-01-01T00:00:00+00:00"
        };
        insert(&conn, "acme", row, start, MAX_DATE);
    }
    let mut old = grid[0].clone();
    old.insert("geoCity".to_string(), Scalar::str("Lyon"));
    insert(&conn, "acme", &old, "2010-01-01T00:00:00+00:00", "2023-06-01T00:00:00+00:00");
    let mut other = grid[1].clone();
    other.insert("id".to_string(), Scalar::Ref(hsgrid::datatype::Ref::new("x1")));
    insert(&conn, "other", &other, "2010-01-01T00:00:00+00:00", MAX_DATE);
    conn
}

fn query_at(conn: &Connection, filter: &str, version: DateTime<Utc>, limit: Option<usize>) -> Vec<String> {
    let sql = sql_filter_for(SqlDialect::Sqlite, "haystack", filter, &version, limit, "acme")
        .unwrap_or_else(|e| panic!("{filter}: {e}"));
    let mut statement = conn.prepare(&sql).unwrap_or_else(|e| panic!("{e}\n{sql}"));
    let entities = statement
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    let mut ids: Vec<String> = entities
        .iter()
        .map(|text| {
            let value: serde_json::Value = serde_json::from_str(text).unwrap();
            let id = value["id"].as_str().unwrap();
            id.trim_start_matches("r:").split(' ').next().unwrap().to_string()
        })
        .collect();
    ids.sort();
    ids
}

fn query(conn: &Connection, filter: &str) -> Vec<String> {
    query_at(conn, filter, at(2024, 1, 1), None)
}

#[test]
fn tag_tests() {
    let conn = database();
    assert_eq!(query(&conn, "site"), ["s1", "s2"]);
    assert_eq!(query(&conn, "site or equip"), ["e1", "e2", "s1", "s2"]);
    assert_eq!(query(&conn, "point and not equip"), ["p1", "p2", "p3"]);
    assert_eq!(query(&conn, "not site and not point"), ["e1", "e2"]);
    assert_eq!(query(&conn, "").len(), 7);
}

#[test]
fn comparisons() {
    let conn = database();
    assert_eq!(query(&conn, "geoCity == \"Paris\""), ["s1"]);
    assert_eq!(query(&conn, "area > 1000"), ["s1"]);
    assert_eq!(query(&conn, "area == 800"), ["s2"]);
    assert_eq!(query(&conn, "curVal < 5"), ["p3"]);
    assert_eq!(query(&conn, "enabled == true"), ["e1"]);
    assert_eq!(query(&conn, "enabled == false"), ["e2"]);
    assert_eq!(query(&conn, "installed < 2018-01-01"), ["s1"]);
    assert_eq!(query(&conn, "dis < \"B\""), ["e1", "e2"]);
    assert_eq!(query(&conn, "siteRef == @s1"), ["e1", "p1", "p2"]);
    assert_eq!(query(&conn, "equip and curVal == N"), ["e1", "e2"]);
}

#[test]
fn joins_follow_refs() {
    let conn = database();
    assert_eq!(query(&conn, "equip and siteRef->geoCity == \"Paris\""), ["e1"]);
    assert_eq!(query(&conn, "point and equipRef->siteRef->geoCity == \"Lyon\""), ["p3"]);
    assert_eq!(query(&conn, "site or siteRef->area > 1000"), ["e1", "p1", "p2", "s1", "s2"]);
    assert_eq!(query(&conn, "(site or siteRef->area > 1000) and point"), ["p1", "p2"]);
}

#[test]
fn versions_select_the_valid_row() {
    let conn = database();
    assert_eq!(query_at(&conn, "geoCity == \"Lyon\"", at(2022, 1, 1), None), ["s1", "s2"]);
    assert_eq!(query_at(&conn, "geoCity == \"Lyon\"", at(2024, 1, 1), None), ["s2"]);
    assert!(query_at(&conn, "site", at(2000, 1, 1), None).is_empty());
}

#[test]
fn limits() {
    let conn = database();
    assert_eq!(query_at(&conn, "point", at(2024, 1, 1), Some(2)).len(), 2);
    assert_eq!(query_at(&conn, "site or siteRef->site", at(2024, 1, 1), Some(1)).len(), 1);
}

const MIXED: &str = r#"ver:"3.0"
id,val
@v1,M
@v2,"hello"
@v3,42
@v4,5kW
@v5,`http://example.org`
@v6,2021-01-01T00:00:00Z UTC
@v7,2020-01-01
@v8,08:00:00
@v9,@r1
"#;

#[test]
fn ordering_only_matches_values_of_the_same_kind() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&create_table(SqlDialect::Sqlite, "haystack")).unwrap();
    let grid = zinc::parse_grid(MIXED).unwrap();
    for row in grid.iter() {
        insert(&conn, "acme", row, "2010-01-01T00:00:00+00:00", MAX_DATE);
    }
    let cases = [
        ("val < 10", "v4"),
        ("val > 10", "v3"),
        ("val > \"a\"", "v2"),
        ("val >= 2019-06-01", "v7"),
        ("val < 2021-06-01T00:00:00Z UTC", "v6"),
        ("val < 12:00:00", "v8"),
    ];
    for (filter, expected) in cases {
        let found = query(&conn, filter);
        assert_eq!(found, [expected], "{filter}");
        let in_memory: Vec<String> =
            grid.filter(filter, None).unwrap().ids().map(|r| r.name.clone()).collect();
        assert_eq!(found, in_memory, "{filter}");
    }
}
