//! Adapter facades for pharma data providers
//!
//! Each adapter in [`sources`] accepts a typed parameter struct, builds a
//! provider-independent query from it, and runs the shared [`Plan`] pipeline:
//! compile with the provider's dialect, execute over HTTP, extract the item list
//! from the response envelope, project the requested fields and compute the next
//! page. Results carry [`QueryMetadata`] describing exactly what was asked.
//!
//! ```no_run
//! use pharmaquery_adapters::sources::{AdverseEventsParams, FdaAdverseEvents};
//! use pharmaquery_adapters::ProvidersConfig;
//!
//! # async fn run() -> pharmaquery_adapters::Result<()> {
//! let adapter = FdaAdverseEvents::new(&ProvidersConfig::default())?;
//! let params = AdverseEventsParams {
//!     search_query: Some(r#"patient.drug.medicinalproduct:"METFORMIN""#.into()),
//!     limit: Some(5),
//!     ..Default::default()
//! };
//! let response = adapter.search(&params, None).await?;
//! println!("{} reports", response.records().len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod response;
pub mod sources;

pub use config::{EntrezConfig, ProviderConfig, ProvidersConfig};
pub use error::{Error, ErrorKind, RequestContext, Result};
pub use metadata::{NextPage, QueryMetadata};
pub use pipeline::Plan;
pub use response::{AdapterResponse, Payload};
pub use sources::{DateRange, Source};
