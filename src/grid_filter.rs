//! Filters compiled into closures and run against the rows of a grid.
//!
//! A path like `siteRef->geoCity` follows the ref in `siteRef` to the row of
//! the same grid holding that id, then reads `geoCity` there. When any hop
//! is missing the path resolves to [`NotFound`], which every comparison
//! treats as false.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use tracing::debug;

use crate::cache::LruCache;
use crate::datatype::{Entity, Scalar};
use crate::error::{HaystackError, Result};
use crate::filter::{parse_filter, BinaryOp, FilterNode, FilterPath, UnaryOp};
use crate::grid::Grid;
use crate::settings::Settings;

/// A compiled filter. The grid is used to follow refs.
pub type Predicate = Arc<dyn Fn(&Grid, &Entity) -> bool + Send + Sync>;

/// What a path resolves to when a hop is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFound;

lazy_static! {
    static ref FILTER_CACHE: FilterCache = FilterCache::default();
}

/// The cache shared by [`filter_function`].
pub fn filter_cache() -> &'static FilterCache {
    &FILTER_CACHE
}

/// Compile a filter expression, reusing a previous compilation from the
/// shared cache.
pub fn filter_function(expr: &str) -> Result<Predicate> {
    FILTER_CACHE.get_or_compile(expr)
}

/// Compile a filter expression without caching it.
pub fn compile_filter(expr: &str) -> Result<Predicate> {
    let ast = parse_filter(expr)?;
    let predicate = compile(&ast.head)?;
    debug!(filter = expr, "compiled filter");
    Ok(predicate)
}

/// Resolve a path against a row.
pub fn resolve<'g>(grid: &'g Grid, row: &'g Entity, path: &FilterPath) -> std::result::Result<&'g Scalar, NotFound> {
    let (last, hops) = path.segments.split_last().ok_or(NotFound)?;
    let mut current = row;
    for hop in hops {
        current = match current.get(hop) {
            Some(Scalar::Ref(id)) => grid.get_by_id(id).ok_or(NotFound)?,
            Some(Scalar::Dict(dict)) => dict,
            _ => return Err(NotFound),
        };
    }
    match current.get(last) {
        None | Some(Scalar::Null) => Err(NotFound),
        Some(value) => Ok(value),
    }
}

fn compile(node: &FilterNode) -> Result<Predicate> {
    match node {
        FilterNode::Unary { op, operand } => {
            let FilterNode::Path(path) = operand.as_ref() else {
                return Err(HaystackError::Invariant(format!("{op:?} needs a path, not {operand}")));
            };
            let path = path.clone();
            Ok(match op {
                UnaryOp::Has => Arc::new(move |grid: &Grid, row: &Entity| resolve(grid, row, &path).is_ok()),
                UnaryOp::Not => Arc::new(move |grid: &Grid, row: &Entity| resolve(grid, row, &path).is_err()),
            })
        }
        FilterNode::Binary { op: BinaryOp::And, left, right } => {
            let (left, right) = (compile(left)?, compile(right)?);
            Ok(Arc::new(move |grid: &Grid, row: &Entity| left(grid, row) && right(grid, row)))
        }
        FilterNode::Binary { op: BinaryOp::Or, left, right } => {
            let (left, right) = (compile(left)?, compile(right)?);
            Ok(Arc::new(move |grid: &Grid, row: &Entity| left(grid, row) || right(grid, row)))
        }
        FilterNode::Binary { op, left, right } => match (left.as_ref(), right.as_ref()) {
            (FilterNode::Path(path), FilterNode::Value(value)) => Ok(comparison(*op, path.clone(), value.clone())),
            _ => Err(HaystackError::Invariant(format!("cannot compare {left} with {right}"))),
        },
        FilterNode::Path(path) => compile(&FilterNode::has(path.clone())),
        FilterNode::Value(value) => Err(HaystackError::Invariant(format!("{value} is not a condition"))),
    }
}

fn comparison(op: BinaryOp, path: FilterPath, value: Scalar) -> Predicate {
    // a null literal tests for absence
    if value.is_null() {
        return match op {
            BinaryOp::Ne => Arc::new(move |grid: &Grid, row: &Entity| resolve(grid, row, &path).is_ok()),
            BinaryOp::Eq => Arc::new(move |grid: &Grid, row: &Entity| resolve(grid, row, &path).is_err()),
            _ => Arc::new(|_: &Grid, _: &Entity| false),
        };
    }
    let expected = match op {
        BinaryOp::Lt => Some([Ordering::Less, Ordering::Less]),
        BinaryOp::Le => Some([Ordering::Less, Ordering::Equal]),
        BinaryOp::Gt => Some([Ordering::Greater, Ordering::Greater]),
        BinaryOp::Ge => Some([Ordering::Greater, Ordering::Equal]),
        _ => None,
    };
    match (op, expected) {
        (BinaryOp::Eq, _) => Arc::new(move |grid: &Grid, row: &Entity| {
            resolve(grid, row, &path).is_ok_and(|found| found.filter_eq(&value))
        }),
        (BinaryOp::Ne, _) => Arc::new(move |grid: &Grid, row: &Entity| {
            resolve(grid, row, &path).is_ok_and(|found| !found.filter_eq(&value))
        }),
        (_, Some(accepted)) => Arc::new(move |grid: &Grid, row: &Entity| {
            resolve(grid, row, &path)
                .ok()
                .and_then(|found| found.filter_cmp(&value))
                .is_some_and(|ordering| accepted.contains(&ordering))
        }),
        _ => Arc::new(|_: &Grid, _: &Entity| false),
    }
}

// ------------- Cache -------------

/// Compiled filters keyed by their text, least recently used evicted first.
pub struct FilterCache {
    inner: Mutex<LruCache<String, Predicate>>,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl FilterCache {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.filter_cache_size)
    }

    pub fn get_or_compile(&self, expr: &str) -> Result<Predicate> {
        if let Some(predicate) = self.inner.lock()?.get(expr) {
            return Ok(predicate.clone());
        }
        // compile outside the lock, two threads may race on the same text
        let predicate = compile_filter(expr)?;
        let evicted = self.inner.lock()?.put(expr.to_string(), predicate.clone());
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "filter cache full");
        }
        Ok(predicate)
    }

    pub fn contains(&self, expr: &str) -> Result<bool> {
        Ok(self.inner.lock()?.contains(expr))
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.lock()?.len())
    }
    pub fn capacity(&self) -> Result<usize> {
        Ok(self.inner.lock()?.capacity())
    }
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        let evicted = self.inner.lock()?.set_capacity(capacity);
        debug!(capacity, evicted = evicted.len(), "filter cache resized");
        Ok(())
    }
    pub fn clear(&self) -> Result<()> {
        self.inner.lock()?.clear();
        Ok(())
    }
}
