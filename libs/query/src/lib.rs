//! Provider-agnostic query IR and dialect compilers
//!
//! Callers describe *what* they want as a [`Query`] (a tree of [`Predicate`]s,
//! usually built with [`QueryBuilder`]). A [`Dialect`] then checks the query
//! against the provider's capabilities and compiles it, together with
//! [`Pagination`] and [`ShapeHints`], into a [`CompiledRequest`]: the exact URL,
//! parameters and response envelope for one provider call.
//!
//! Compilation is pure. Nothing here performs I/O, and compiling the same query
//! twice yields identical requests.
//!
//! # Example
//!
//! ```rust
//! use pharmaquery_query::dialect::{Dialect, OpenFda};
//! use pharmaquery_query::{Pagination, QueryBuilder, ShapeHints};
//!
//! let query = QueryBuilder::new()
//!     .equals("generic_name", Some("metformin"))
//!     .equals("route", Some("ORAL"))
//!     .build()
//!     .unwrap();
//!
//! let dialect = OpenFda::new("drug/event.json");
//! dialect.validate(&query).unwrap();
//! let request = dialect.compile(&query, &Pagination::default(), &ShapeHints::default());
//!
//! assert_eq!(
//!     request.url(),
//!     r#"https://api.fda.gov/drug/event.json?search=generic_name:"metformin"+AND+route:"ORAL"&limit=100"#
//! );
//! ```

pub mod builder;
pub mod dialect;
pub mod error;
pub mod ir;
pub mod page;
pub mod request;

pub use builder::QueryBuilder;
pub use dialect::{Capabilities, Dialect, DialectKind, FaultClass, HttpFault};
pub use error::{QueryError, Result};
pub use ir::{Predicate, Query, RangeBound, RawPredicate};
pub use page::{
    CompileOptions, Cursor, PageLimits, PageState, Pagination, ShapeHints, SortDirection,
    SortKey,
};
pub use request::{
    CompiledRequest, CursorLocation, Envelope, Paging, ProjectionSite, Provider, RequestMode,
    ResponseFormat, RetryEligibility,
};
