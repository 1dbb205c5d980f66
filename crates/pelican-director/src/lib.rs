//! # Pelican Director
//!
//! The director is the routing brain of a Pelican federation. It holds a
//! TTL-bounded catalog of live origin and cache advertisements, probes
//! origin health with upload/download/delete test cycles, and redirects
//! client object requests to the best endpoint.
//!
//! ## API Endpoints
//!
//! - `POST /api/v1.0/director/registerOrigin` - Accept an origin advertisement
//! - `POST /api/v1.0/director/registerCache` - Accept a cache advertisement
//! - `GET /api/v1.0/director/object/<path>` - Redirect to the best cache
//! - `GET /api/v1.0/director/origin/<path>` - Redirect to an origin
//! - `GET /api/v1.0/director/stat/<path>` - Existence probe fan-out
//! - `GET /api/v1.0/director/listNamespaces` - Advertised origin namespaces
//! - `GET /metrics` - Prometheus metrics

pub mod api;
pub mod catalog;
pub mod geo;
pub mod metrics;
pub mod prober;
pub mod router;
pub mod verify;

pub use api::{create_router, spawn_janitor, AppState};
pub use catalog::{Catalog, EntrySnapshot, ServerIdentity, SuiteHandle};
pub use geo::{Coordinate, GeoResolver, StaticResolver};
pub use prober::Prober;
pub use verify::AdVerifier;
