//! Compilation of filters into SQL over a versioned entity table.
//!
//! The table holds one row per entity, customer and validity window:
//!
//! ```text
//! id TEXT, customer_id TEXT, start_datetime, end_datetime, entity JSON
//! ```
//!
//! where `entity` is the row in the Haystack JSON encoding and the current
//! version of an entity ends at [`MAX_DATE`]. Values are stored as prefixed
//! strings (`n:12 kW`), so ordered comparisons strip the prefix and cast.
//!
//! Compilation runs in two passes. The first rewrites the filter tree:
//! single tag tests joined by the same operator collapse into one array
//! test, and an `and`/`or` with a side that walks a ref path becomes an
//! `INTERSECT`/`UNION` of two selects, since every path needs its own chain
//! of table aliases. The second pass prints the SQL.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::datatype::Scalar;
use crate::error::{HaystackError, Result};
use crate::filter::{parse_filter, BinaryOp, FilterNode, FilterPath, UnaryOp};
use crate::json;
use crate::settings::Settings;
use crate::version::Version;

/// End of the validity window of the current version of an entity.
pub const MAX_DATE: &str = "9999-12-31T23:59:59";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    /// `entity` is a `jsonb` column.
    #[default]
    Postgres,
    /// `entity` is JSON text read with the JSON1 functions.
    Sqlite,
}

/// The filter tree after the rewrite pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlNode {
    Has(FilterPath),
    NotHas(FilterPath),
    /// Several single tag tests; `all` when joined by `and`, `negated` for
    /// `not` tests.
    HasTags { all: bool, negated: bool, tags: Vec<String> },
    Compare { op: BinaryOp, path: FilterPath, value: Scalar },
    And(Box<SqlNode>, Box<SqlNode>),
    Or(Box<SqlNode>, Box<SqlNode>),
    Intersect(Box<SqlNode>, Box<SqlNode>),
    Union(Box<SqlNode>, Box<SqlNode>),
}

impl SqlNode {
    fn needs_join(&self) -> bool {
        match self {
            SqlNode::Has(path) | SqlNode::NotHas(path) | SqlNode::Compare { path, .. } => !path.is_simple(),
            _ => false,
        }
    }
    fn is_compound(&self) -> bool {
        matches!(self, SqlNode::Intersect(..) | SqlNode::Union(..))
    }
}

// ------------- Rewrite -------------

pub fn optimize(node: &FilterNode) -> Result<SqlNode> {
    match node {
        FilterNode::Path(path) => Ok(SqlNode::Has(path.clone())),
        FilterNode::Unary { op, operand } => {
            let FilterNode::Path(path) = operand.as_ref() else {
                return Err(HaystackError::Invariant(format!("{op:?} needs a path, not {operand}")));
            };
            Ok(match op {
                UnaryOp::Has => SqlNode::Has(path.clone()),
                UnaryOp::Not => SqlNode::NotHas(path.clone()),
            })
        }
        FilterNode::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), left, right } => {
            let all = *op == BinaryOp::And;
            let (left, right) = match merge(optimize(left)?, optimize(right)?, all) {
                Ok(merged) => return Ok(merged),
                Err(sides) => sides,
            };
            let split = left.needs_join() || right.needs_join() || left.is_compound() || right.is_compound();
            let (left, right) = (Box::new(left), Box::new(right));
            Ok(match (all, split) {
                (true, true) => SqlNode::Intersect(left, right),
                (true, false) => SqlNode::And(left, right),
                (false, true) => SqlNode::Union(left, right),
                (false, false) => SqlNode::Or(left, right),
            })
        }
        FilterNode::Binary { op, left, right } => match (left.as_ref(), right.as_ref()) {
            (FilterNode::Path(path), FilterNode::Value(value)) => {
                Ok(SqlNode::Compare { op: *op, path: path.clone(), value: value.clone() })
            }
            _ => Err(HaystackError::Invariant(format!("cannot compare {left} with {right}"))),
        },
        FilterNode::Value(value) => Err(HaystackError::Invariant(format!("{value} is not a condition"))),
    }
}

/// Collapse two tag tests of the same polarity, or hand both sides back.
fn merge(left: SqlNode, right: SqlNode, all: bool) -> std::result::Result<SqlNode, (SqlNode, SqlNode)> {
    use SqlNode::*;
    match (left, right) {
        (HasTags { all: a, negated, mut tags }, Has(path)) if a == all && !negated && path.is_simple() => {
            tags.push(path.head().to_string());
            Ok(HasTags { all, negated, tags })
        }
        (HasTags { all: a, negated, mut tags }, NotHas(path)) if a == all && negated && path.is_simple() => {
            tags.push(path.head().to_string());
            Ok(HasTags { all, negated, tags })
        }
        (Has(path), HasTags { all: a, negated, mut tags }) if a == all && !negated && path.is_simple() => {
            tags.insert(0, path.head().to_string());
            Ok(HasTags { all, negated, tags })
        }
        (NotHas(path), HasTags { all: a, negated, mut tags }) if a == all && negated && path.is_simple() => {
            tags.insert(0, path.head().to_string());
            Ok(HasTags { all, negated, tags })
        }
        (HasTags { all: a, negated: n, mut tags }, HasTags { all: b, negated: m, tags: more })
            if a == all && b == all && n == m =>
        {
            tags.extend(more);
            Ok(HasTags { all, negated: n, tags })
        }
        (Has(l), Has(r)) if l.is_simple() && r.is_simple() => Ok(HasTags {
            all,
            negated: false,
            tags: vec![l.head().to_string(), r.head().to_string()],
        }),
        (NotHas(l), NotHas(r)) if l.is_simple() && r.is_simple() => Ok(HasTags {
            all,
            negated: true,
            tags: vec![l.head().to_string(), r.head().to_string()],
        }),
        sides => Err(sides),
    }
}

// ------------- Generation -------------

/// Compile a filter for PostgreSQL.
pub fn sql_filter(
    table: &str,
    filter: &str,
    version: &DateTime<Utc>,
    limit: Option<usize>,
    customer_id: &str,
) -> Result<String> {
    sql_filter_for(SqlDialect::Postgres, table, filter, version, limit, customer_id)
}

/// Compile a filter to a query returning the `entity` column of the rows
/// valid at `version` for `customer_id`. An empty filter selects them all.
pub fn sql_filter_for(
    dialect: SqlDialect,
    table: &str,
    filter: &str,
    version: &DateTime<Utc>,
    limit: Option<usize>,
    customer_id: &str,
) -> Result<String> {
    let node = match filter.trim() {
        "" => None,
        text => Some(optimize(&parse_filter(text)?.head)?),
    };
    let mut writer = SqlWriter {
        dialect,
        table,
        customer_id: &escape(customer_id),
        version: version.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        alias: 1,
    };
    let mut sql = format!("-- {}\n", filter.replace(['\r', '\n'], " "));
    match &node {
        Some(node) => sql.push_str(&writer.block(node)?),
        None => sql.push_str(&writer.select(None)?),
    }
    if let Some(limit) = limit.filter(|l| *l > 0) {
        sql.push_str(&format!("LIMIT {limit}\n"));
    }
    debug!(%sql, ?dialect, "compiled filter to SQL");
    Ok(sql)
}

/// Compile against the table and customer named in the settings.
pub fn sql_filter_with(
    settings: &Settings,
    dialect: SqlDialect,
    filter: &str,
    version: &DateTime<Utc>,
    limit: Option<usize>,
) -> Result<String> {
    sql_filter_for(dialect, &settings.sql_table, filter, version, limit, &settings.customer_id)
}

/// The statement creating the entity table.
pub fn create_table(dialect: SqlDialect, table: &str) -> String {
    match dialect {
        SqlDialect::Postgres => format!(
            "CREATE TABLE IF NOT EXISTS {table}\n(\n\
             id text,\n\
             customer_id text NOT NULL,\n\
             start_datetime timestamp WITH TIME ZONE NOT NULL,\n\
             end_datetime timestamp WITH TIME ZONE NOT NULL,\n\
             entity jsonb NOT NULL\n);\n"
        ),
        SqlDialect::Sqlite => format!(
            "CREATE TABLE IF NOT EXISTS {table}\n(\n\
             id TEXT,\n\
             customer_id TEXT NOT NULL,\n\
             start_datetime TEXT NOT NULL,\n\
             end_datetime TEXT NOT NULL,\n\
             entity JSON NOT NULL\n);\n"
        ),
    }
}

struct SqlWriter<'a> {
    dialect: SqlDialect,
    table: &'a str,
    customer_id: &'a str,
    version: String,
    /// Highest table alias in use.
    alias: usize,
}

impl SqlWriter<'_> {
    fn block(&mut self, node: &SqlNode) -> Result<String> {
        match node {
            SqlNode::Intersect(left, right) => self.compound(left, right, "INTERSECT"),
            SqlNode::Union(left, right) => self.compound(left, right, "UNION"),
            _ => self.select(Some(node)),
        }
    }

    fn compound(&mut self, left: &SqlNode, right: &SqlNode, keyword: &str) -> Result<String> {
        let left = self.member(left)?;
        self.alias += 1;
        let right = self.member(right)?;
        Ok(format!("{left}{keyword}\n{right}"))
    }

    /// One side of an `INTERSECT` or `UNION`. SQLite refuses parentheses
    /// around a plain select.
    fn member(&mut self, node: &SqlNode) -> Result<String> {
        let sql = self.block(node)?;
        Ok(match self.dialect {
            SqlDialect::Postgres => format!("(\n{sql})\n"),
            SqlDialect::Sqlite if node.is_compound() => format!("SELECT entity FROM (\n{sql})\n"),
            SqlDialect::Sqlite => sql,
        })
    }

    fn select(&mut self, node: Option<&SqlNode>) -> Result<String> {
        let t = self.alias;
        let mut joins = String::new();
        let condition = node.map(|node| self.condition(node, t, &mut joins)).transpose()?;
        let mut sql = format!(
            "SELECT t{t}.entity\nFROM {table} as t{t}\n{joins}WHERE\n{version}AND t{t}.customer_id='{customer}'\n",
            table = self.table,
            version = self.version_predicate(t),
            customer = self.customer_id,
        );
        if let Some(condition) = condition {
            sql.push_str(&format!("AND {condition}\n"));
        }
        Ok(sql)
    }

    fn version_predicate(&self, t: usize) -> String {
        match self.dialect {
            SqlDialect::Postgres => {
                format!("'{}' BETWEEN t{t}.start_datetime AND t{t}.end_datetime\n", self.version)
            }
            SqlDialect::Sqlite => format!(
                "datetime('{}') BETWEEN datetime(t{t}.start_datetime) AND datetime(t{t}.end_datetime)\n",
                self.version
            ),
        }
    }

    /// Join one alias per hop of the path and return the alias holding the
    /// last tag.
    fn path(&mut self, path: &FilterPath, t: usize, joins: &mut String) -> usize {
        let mut previous = t;
        if let Some((_, hops)) = path.segments.split_last() {
            for hop in hops {
                self.alias += 1;
                let k = self.alias;
                let link = format!(
                    "{} = {}",
                    self.ref_id(&self.value(previous, hop)),
                    self.ref_id(&self.value(k, "id"))
                );
                joins.push_str(&format!(
                    "INNER JOIN {table} AS t{k} ON\n{version}AND t{k}.customer_id='{customer}'\nAND {link}\n",
                    table = self.table,
                    version = self.version_predicate(k),
                    customer = self.customer_id,
                ));
                previous = k;
            }
        }
        previous
    }

    fn condition(&mut self, node: &SqlNode, t: usize, joins: &mut String) -> Result<String> {
        match node {
            SqlNode::Has(path) => {
                let alias = self.path(path, t, joins);
                Ok(self.has(alias, last(path)))
            }
            SqlNode::NotHas(path) => {
                let alias = self.path(path, t, joins);
                Ok(self.not_has(alias, last(path)))
            }
            SqlNode::HasTags { all, negated, tags } => Ok(self.has_tags(t, *all, *negated, tags)),
            SqlNode::Compare { op, path, value } => {
                let alias = self.path(path, t, joins);
                self.compare(*op, &self.value(alias, last(path)), value)
            }
            SqlNode::And(left, right) => {
                let left = self.condition(left, t, joins)?;
                let right = self.condition(right, t, joins)?;
                Ok(format!("({left})\nAND ({right})"))
            }
            SqlNode::Or(left, right) => {
                let left = self.condition(left, t, joins)?;
                let right = self.condition(right, t, joins)?;
                Ok(format!("({left})\nOR ({right})"))
            }
            SqlNode::Intersect(..) | SqlNode::Union(..) => {
                Err(HaystackError::Invariant("a compound query inside a condition".to_string()))
            }
        }
    }

    fn has(&self, t: usize, tag: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("t{t}.entity ? '{tag}'"),
            SqlDialect::Sqlite => format!("{} IS NOT NULL", self.value(t, tag)),
        }
    }

    fn not_has(&self, t: usize, tag: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("NOT t{t}.entity ? '{tag}'"),
            SqlDialect::Sqlite => format!("{} IS NULL", self.value(t, tag)),
        }
    }

    fn has_tags(&self, t: usize, all: bool, negated: bool, tags: &[String]) -> String {
        match self.dialect {
            SqlDialect::Postgres => {
                let array = tags.iter().map(|tag| format!("'{tag}'")).collect::<Vec<_>>().join(",");
                // not a and not b == not (a or b)
                match (all, negated) {
                    (true, false) => format!("t{t}.entity ?& array[{array}]"),
                    (false, false) => format!("t{t}.entity ?| array[{array}]"),
                    (true, true) => format!("NOT t{t}.entity ?| array[{array}]"),
                    (false, true) => format!("NOT t{t}.entity ?& array[{array}]"),
                }
            }
            SqlDialect::Sqlite => {
                let tests: Vec<String> = tags
                    .iter()
                    .map(|tag| if negated { self.not_has(t, tag) } else { self.has(t, tag) })
                    .collect();
                format!("({})", tests.join(if all { " AND " } else { " OR " }))
            }
        }
    }

    /// The stored text of a tag.
    fn value(&self, t: usize, tag: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("t{t}.entity->>'{tag}'"),
            SqlDialect::Sqlite => format!("json_extract(t{t}.entity,'$.{tag}')"),
        }
    }

    /// The first word of a stored value: the `r:id` of a ref with a display
    /// name, the magnitude of a quantity, the instant of a datetime.
    fn first_word(&self, expr: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("split_part({expr},' ',1)"),
            SqlDialect::Sqlite => format!("substr({expr}||' ',1,instr({expr}||' ',' ')-1)"),
        }
    }

    fn ref_id(&self, expr: &str) -> String {
        self.first_word(expr)
    }

    fn strip_prefix(&self, expr: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => format!("SUBSTRING({expr},3)"),
            SqlDialect::Sqlite => format!("substr({expr},3)"),
        }
    }

    fn compare(&self, op: BinaryOp, x: &str, value: &Scalar) -> Result<String> {
        match op {
            BinaryOp::Eq | BinaryOp::Ne => self.equality(op == BinaryOp::Eq, x, value),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => self.ordered(op, x, value),
            BinaryOp::And | BinaryOp::Or => Err(HaystackError::Invariant(format!("{op:?} is not a comparison"))),
        }
    }

    /// Only values stored with `prefix` reach the cast; any other kind turns
    /// into NULL, which no comparison matches.
    fn typed(&self, x: &str, prefix: &str, expr: &str) -> String {
        format!("CASE WHEN {x} LIKE '{prefix}%' THEN {expr} END")
    }

    fn ordered(&self, op: BinaryOp, x: &str, value: &Scalar) -> Result<String> {
        let symbol = op.symbol();
        let stripped = self.strip_prefix(x);
        let sql = match (self.dialect, value) {
            (_, Scalar::Number(n)) if !n.value.is_finite() => {
                return Err(HaystackError::Invariant(format!("cannot compare with {value} in SQL")));
            }
            (SqlDialect::Postgres, Scalar::Number(n)) => {
                let cast = format!("{}::float", self.first_word(&stripped));
                format!("{} {symbol} {}", self.typed(x, "n:", &cast), n.value)
            }
            (SqlDialect::Sqlite, Scalar::Number(n)) => {
                let cast = format!("CAST({} AS REAL)", self.first_word(&stripped));
                format!("{} {symbol} {}", self.typed(x, "n:", &cast), n.value)
            }
            (SqlDialect::Postgres, Scalar::Time(time)) => format!(
                "{} {symbol} TIME '{}'",
                self.typed(x, "h:", &format!("{stripped}::TIME")),
                time.format("%H:%M:%S%.f")
            ),
            (SqlDialect::Sqlite, Scalar::Time(time)) => format!(
                "{} {symbol} time('{}')",
                self.typed(x, "h:", &format!("time({stripped})")),
                time.format("%H:%M:%S%.f")
            ),
            (SqlDialect::Postgres, Scalar::DateTime(dt)) => format!(
                "{} {symbol} TIMESTAMPTZ '{}'",
                self.typed(x, "t:", &format!("{}::TIMESTAMPTZ", self.first_word(&stripped))),
                dt.to_rfc3339()
            ),
            (SqlDialect::Sqlite, Scalar::DateTime(dt)) => format!(
                "{} {symbol} datetime('{}')",
                self.typed(x, "t:", &format!("datetime({})", self.first_word(&stripped))),
                dt.to_rfc3339()
            ),
            (SqlDialect::Postgres, Scalar::Date(date)) => format!(
                "{} {symbol} DATE '{}'",
                self.typed(x, "d:", &format!("{stripped}::DATE")),
                date.format("%Y-%m-%d")
            ),
            (SqlDialect::Sqlite, Scalar::Date(date)) => format!(
                "{} {symbol} date('{}')",
                self.typed(x, "d:", &format!("date({stripped})")),
                date.format("%Y-%m-%d")
            ),
            (_, Scalar::Str(s)) => format!("{} {symbol} 's:{}'", self.typed(x, "s:", x), escape(s)),
            _ => {
                return Err(HaystackError::Invariant(format!(
                    "operator {symbol} is not supported for {}",
                    value.kind()
                )));
            }
        };
        Ok(sql)
    }

    fn equality(&self, eq: bool, x: &str, value: &Scalar) -> Result<String> {
        let symbol = if eq { "=" } else { "!=" };
        let sql = match value {
            Scalar::Null => format!("{x} IS {}NULL", if eq { "" } else { "NOT " }),
            Scalar::Ref(r) => format!("{} {symbol} 'r:{}'", self.ref_id(x), escape(&r.name)),
            Scalar::Bool(b) => match self.dialect {
                SqlDialect::Postgres => format!("{x} {symbol} '{b}'"),
                SqlDialect::Sqlite => format!("{x} {symbol} {}", u8::from(*b)),
            },
            // a number without unit matches the quantities of the same magnitude
            Scalar::Number(n) if n.unit.is_none() => {
                let encoded = encoded(value)?;
                let test = format!("({x} = '{encoded}' OR {x} LIKE '{encoded} %')");
                if eq { test } else { format!("NOT {test}") }
            }
            Scalar::List(_) | Scalar::Dict(_) | Scalar::Grid(_) => {
                let json = escape(&json::dump_scalar(value, &Version::latest())?);
                match self.dialect {
                    SqlDialect::Postgres => format!("{} {symbol} '{json}'::jsonb", x.replacen("->>", "->", 1)),
                    SqlDialect::Sqlite => {
                        warn!(value = value.kind(), "SQLite compares containers as JSON text, key order matters");
                        format!("{x} {symbol} '{json}'")
                    }
                }
            }
            _ => format!("{x} {symbol} '{}'", encoded(value)?),
        };
        Ok(sql)
    }
}

/// The JSON string a scalar is stored as, escaped for a SQL literal.
fn encoded(value: &Scalar) -> Result<String> {
    match json::scalar_to_value(value, &Version::latest())? {
        serde_json::Value::String(s) => Ok(escape(&s)),
        other => Ok(escape(&other.to_string())),
    }
}

fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

fn last(path: &FilterPath) -> &str {
    path.segments.last().map(String::as_str).unwrap_or_default()
}
