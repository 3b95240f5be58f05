//! Generic document model and field projection
//!
//! Every provider payload, JSON or XML, is normalized into a [`Document`] (a
//! `serde_json::Value`) before anything else looks at it. On top of that model this
//! crate provides:
//!
//! - [`FieldPath`]: a validated dot-separated path such as `products.brand_name`
//! - [`project`]: reduce a document to the requested paths, preserving nesting
//! - [`xml::parse_document`]: XML → document normalization
//!
//! # Known limitation
//!
//! Projection descends into the **first** element of any sequence it meets on the
//! way down. A path such as `products.brand_name` over a multi-element `products`
//! array yields only the first product's brand name. Multi-element projection is
//! not supported.
//!
//! # Example
//!
//! ```rust
//! use pharmaquery_document::{project, FieldPath};
//! use serde_json::json;
//!
//! let doc = json!({
//!     "application_number": "NDA204629",
//!     "products": [{ "brand_name": "JARDIANCE", "route": "ORAL" }]
//! });
//! let paths = vec![FieldPath::parse("products.brand_name").unwrap()];
//!
//! assert_eq!(
//!     project(&doc, &paths),
//!     json!({ "products": { "brand_name": "JARDIANCE" } })
//! );
//! ```

pub mod error;
pub mod path;
pub mod projector;
pub mod xml;

pub use error::{PathError, XmlError};
pub use path::FieldPath;
pub use projector::{project, project_items, resolve};

/// Generic document: scalar, ordered sequence, or string-keyed mapping.
pub type Document = serde_json::Value;
