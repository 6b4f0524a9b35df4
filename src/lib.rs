//! hsgrid – the Project Haystack data model: grids, their encodings and the
//! filter language.
//!
//! A [`grid::Grid`] is a table with versioned metadata, ordered columns (each
//! with its own metadata) and rows of tags. Tag values are
//! [`datatype::Scalar`] values: markers, numbers with units, strings, refs,
//! dates and times with Haystack timezone names, and from Haystack 3.0 on,
//! lists, dicts and nested grids.
//!
//! ## Modules
//! * [`zinc`], [`json`], [`csv`] – the three encodings, and [`codec`] to
//!   pick one by name or MIME type.
//! * [`filter`] – the filter language parsed into an AST.
//! * [`grid_filter`] – filters compiled into predicates over a grid, with a
//!   bounded cache of compiled filters.
//! * [`sql`] – filters compiled into PostgreSQL or SQLite queries over a
//!   table of versioned entities.
//! * [`grid_diff`] – the differences between two grids, and their merge.
//! * [`provider`] – the operations a Haystack server built on this crate
//!   answers.
//! * [`settings`] – configuration and logging.
//!
//! ## Quick Start
//! ```
//! use hsgrid::{codec, codec::Format};
//! let grid = codec::parse_one("ver:\"3.0\"\nid,dis,site\n@s1,\"HQ\",M\n@s2,\"Depot\",\n", Format::Zinc).unwrap();
//! let sites = grid.filter("site", None).unwrap();
//! assert_eq!(sites.len(), 1);
//! let json = codec::dump(&sites, Format::Json).unwrap();
//! assert!(json.contains("\"dis\":\"s:HQ\""));
//! ```

pub mod cache;
pub mod codec;
pub mod csv;
pub mod datatype;
pub mod error;
pub mod filter;
pub mod grid;
pub mod grid_diff;
pub mod grid_filter;
pub mod json;
pub mod metadata;
pub mod provider;
pub mod settings;
pub mod sql;
pub mod version;
pub mod zinc;
pub mod zoneinfo;

pub use datatype::{Entity, Scalar};
pub use error::{HaystackError, Result};
pub use grid::Grid;
pub use version::Version;
