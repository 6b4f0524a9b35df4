//! The filter language: parsing into an abstract syntax tree.
//!
//! ```text
//! site and geoCity == "Paris"
//! equip and siteRef->geoCity == "Paris"
//! not point or (curVal > 10kW and curVal <= 20kW)
//! ```
//!
//! `and` binds tighter than `or`, both are left associative, and parentheses
//! group. A path walks through refs with `->`. Literals use the Zinc syntax
//! with `true` and `false` accepted as booleans.

use std::fmt;

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;

use crate::datatype::Scalar;
use crate::error::{HaystackError, Result};
use crate::version::Version;
use crate::zinc::{first, HaystackParser, Rule, ZincReader};

/// A path of tag names, `siteRef->geoCity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterPath {
    pub segments: Vec<String>,
}

impl FilterPath {
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self { segments: segments.into_iter().map(Into::into).collect() }
    }
    /// The first tag of the path.
    pub fn head(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }
    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }
}

impl fmt::Display for FilterPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.segments.join("->"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Has,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            _ => return None,
        })
    }
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Path(FilterPath),
    Value(Scalar),
    Unary { op: UnaryOp, operand: Box<FilterNode> },
    Binary { op: BinaryOp, left: Box<FilterNode>, right: Box<FilterNode> },
}

impl FilterNode {
    pub fn has(path: FilterPath) -> Self {
        FilterNode::Unary { op: UnaryOp::Has, operand: Box::new(FilterNode::Path(path)) }
    }
    pub fn not(path: FilterPath) -> Self {
        FilterNode::Unary { op: UnaryOp::Not, operand: Box::new(FilterNode::Path(path)) }
    }
    pub fn binary(op: BinaryOp, left: FilterNode, right: FilterNode) -> Self {
        FilterNode::Binary { op, left: Box::new(left), right: Box::new(right) }
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FilterNode::Path(path) => write!(f, "{path}"),
            FilterNode::Value(Scalar::Bool(b)) => write!(f, "{b}"),
            FilterNode::Value(value) => write!(f, "{value}"),
            FilterNode::Unary { op: UnaryOp::Has, operand } => write!(f, "{operand}"),
            FilterNode::Unary { op: UnaryOp::Not, operand } => write!(f, "not {operand}"),
            FilterNode::Binary { op, left, right } if op.is_logical() => {
                write!(f, "(")?;
                write!(f, "{left} {} {right}", op.symbol())?;
                write!(f, ")")
            }
            FilterNode::Binary { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
        }
    }
}

/// A parsed filter and the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterAst {
    pub head: FilterNode,
    pub source: String,
}

impl fmt::Display for FilterAst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.head)
    }
}

pub fn parse_filter(text: &str) -> Result<FilterAst> {
    let mut pairs = HaystackParser::parse(Rule::filter, text).map_err(|e| {
        let col = match e.location {
            InputLocation::Pos(pos) => pos,
            InputLocation::Span((start, _)) => start,
        };
        HaystackError::FilterSyntax {
            message: format!("{} in {text:?} at column {}", e.variant.message(), col + 1),
            col: Some(col + 1),
        }
    })?;
    let filter = pairs.next().ok_or_else(|| HaystackError::Invariant("empty filter tree".to_string()))?;
    let builder = AstBuilder { reader: ZincReader::new(text, &Version::latest()) };
    let head = builder.or(first(filter)?)?;
    Ok(FilterAst { head, source: text.to_string() })
}

struct AstBuilder<'t> {
    reader: ZincReader<'t>,
}

impl AstBuilder<'_> {
    fn or(&self, pair: Pair<'_, Rule>) -> Result<FilterNode> {
        self.chain(pair, BinaryOp::Or, Self::and)
    }
    fn and(&self, pair: Pair<'_, Rule>) -> Result<FilterNode> {
        self.chain(pair, BinaryOp::And, Self::term)
    }

    /// Fold `a op b op c` into `((a op b) op c)`.
    fn chain(
        &self,
        pair: Pair<'_, Rule>,
        op: BinaryOp,
        operand: fn(&Self, Pair<'_, Rule>) -> Result<FilterNode>,
    ) -> Result<FilterNode> {
        let mut inner = pair.into_inner();
        let head = inner.next().ok_or_else(|| HaystackError::Invariant(format!("empty {op:?}")))?;
        let mut node = operand(self, head)?;
        for next in inner {
            node = FilterNode::binary(op, node, operand(self, next)?);
        }
        Ok(node)
    }

    fn term(&self, pair: Pair<'_, Rule>) -> Result<FilterNode> {
        match pair.as_rule() {
            Rule::parens => self.or(first(pair)?),
            Rule::has => Ok(FilterNode::has(path(first(pair)?))),
            Rule::missing => Ok(FilterNode::not(path(first(pair)?))),
            Rule::cmp => {
                let mut inner = pair.into_inner();
                let (Some(left), Some(op), Some(value)) = (inner.next(), inner.next(), inner.next()) else {
                    return Err(HaystackError::Invariant("incomplete comparison".to_string()));
                };
                let op = BinaryOp::from_symbol(op.as_str())
                    .ok_or_else(|| HaystackError::Invariant(format!("unknown operator {}", op.as_str())))?;
                let value = match value.as_rule() {
                    Rule::filter_bool => Scalar::Bool(value.as_str() == "true"),
                    _ => self.reader.scalar(value)?,
                };
                Ok(FilterNode::binary(op, FilterNode::Path(path(left)), FilterNode::Value(value)))
            }
            other => Err(HaystackError::Invariant(format!("{other:?} is not a filter term"))),
        }
    }
}

fn path(pair: Pair<'_, Rule>) -> FilterPath {
    FilterPath::new(pair.into_inner().map(|id| id.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> FilterPath {
        FilterPath::new([name])
    }

    #[test]
    fn precedence() {
        let ast = parse_filter("a or b and c").unwrap();
        let expected = FilterNode::binary(
            BinaryOp::Or,
            FilterNode::has(tag("a")),
            FilterNode::binary(BinaryOp::And, FilterNode::has(tag("b")), FilterNode::has(tag("c"))),
        );
        assert_eq!(ast.head, expected);
    }

    #[test]
    fn left_associative() {
        let ast = parse_filter("a and b and c").unwrap();
        let FilterNode::Binary { left, right, .. } = ast.head else { panic!("not a binary node") };
        assert_eq!(*right, FilterNode::has(tag("c")));
        assert!(matches!(*left, FilterNode::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn comparisons_and_paths() {
        let ast = parse_filter("siteRef->geoCity == \"Paris\"").unwrap();
        assert_eq!(
            ast.head,
            FilterNode::binary(
                BinaryOp::Eq,
                FilterNode::Path(FilterPath::new(["siteRef", "geoCity"])),
                FilterNode::Value(Scalar::str("Paris"))
            )
        );
        let ast = parse_filter("curVal >= 10kW").unwrap();
        assert!(matches!(ast.head, FilterNode::Binary { op: BinaryOp::Ge, .. }));
        let ast = parse_filter("enabled == true").unwrap();
        assert_eq!(
            ast.head,
            FilterNode::binary(BinaryOp::Eq, FilterNode::Path(tag("enabled")), FilterNode::Value(Scalar::Bool(true)))
        );
    }

    #[test]
    fn keywords_need_a_boundary() {
        let ast = parse_filter("notes and order").unwrap();
        assert_eq!(
            ast.head,
            FilterNode::binary(BinaryOp::And, FilterNode::has(tag("notes")), FilterNode::has(tag("order")))
        );
        assert_eq!(parse_filter("not point").unwrap().head, FilterNode::not(tag("point")));
    }

    #[test]
    fn syntax_errors_carry_a_column() {
        let err = parse_filter("site and ==").unwrap_err();
        assert!(matches!(err, HaystackError::FilterSyntax { col: Some(_), .. }));
        assert!(parse_filter("(site").is_err());
    }
}
