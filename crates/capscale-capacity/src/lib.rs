//! capscale-capacity — implementations of `CapacityMutator`.
//!
//! - [`HttpCapacityClient`] talks to the capacity admin API over HTTP/1:
//!   `GET {endpoint}/v1/instances/{id}` and `PUT` on the same path, both
//!   carrying `{"node_count": n}`.
//! - [`InMemoryCapacity`] keeps node counts in process memory. The daemon
//!   uses it when no endpoint is configured (dry-run), tests use it as a
//!   controllable fake.
//!
//! HTTP status codes map onto the collaborator error taxonomy:
//!
//! ```text
//! 404                      → NotFound
//! 408, 429, 5xx            → Transient
//! other 4xx                → Permanent
//! connect error / timeout  → Transient
//! ```

pub mod client;
pub mod error;
pub mod memory;

pub use client::HttpCapacityClient;
pub use error::{CapacityError, CapacityResult};
pub use memory::InMemoryCapacity;
