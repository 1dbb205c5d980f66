//! # Pelican Origin
//!
//! The loops and plumbing hosted inside an origin or cache:
//!
//! - **Advertiser**: registry registration with retry, then periodic signed
//!   advertisement to the director
//! - **Self-test runner**: upload/download/delete probes through the local
//!   data plane
//! - **Authorization files**: authfile and scitokens configuration rendered
//!   atomically for the external data-plane server
//! - **Web API**: issuer JWKS at the WLCG well-known path, health view, and
//!   the director's test-report sink

pub mod advertiser;
pub mod api;
pub mod authfile;
pub mod selftest;

pub use advertiser::Advertiser;
pub use api::{create_router, OriginState};
pub use authfile::{render_authfile, render_scitokens, write_atomic, ScitokensConfig};
pub use selftest::SelfTestRunner;

use rand::RngCore;

/// 256 bits of hex-encoded randomness for challenge nonces.
pub(crate) fn nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
