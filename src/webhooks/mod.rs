//! Admission webhook for pod evictions.
//!
//! The cluster control plane POSTs an AdmissionReview to `/drainer` whenever
//! a pod eviction is requested. Broker pods that should be drained by their
//! operator instead of the eviction API are annotated for a manual rolling
//! update, and the eviction itself can be denied.

pub mod policies;
mod server;

pub use policies::{evaluate, DrainContext, DrainDecision};
pub use server::{router, WebhookState, ROLLING_UPDATE_ANNOTATION};
