//! Client side of the job coordination service.
//!
//! Requests are typed payloads ([`protocol`]), signed by the node key
//! ([`signing`]) and posted through a [`Transport`]. The two job families
//! the service knows about differ only in request and field naming, which
//! is captured by a [`JobDialect`]. Everything above this crate talks to
//! the service through the [`JobService`] trait.

pub mod dialect;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod protocol;
pub mod pubsub;
pub mod service;
pub mod signing;
pub mod transport;

pub use dialect::{FileContent, JobDialect, ProcessingJobDialect, ScriptJobDialect};
pub use error::RemoteError;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryJobService;
pub use protocol::{RequestPayload, ResponsePayload, SignedRequest};
pub use pubsub::{NotificationMessage, PubsubClient, SubscriptionInfo};
pub use service::{JobProperty, JobService, RemoteJobService};
pub use signing::{Ed25519Signer, RequestSigner, SignError, canonical_json, verify_signature};
pub use transport::{HttpTransport, Transport};
