//! Coordinator half: backend polling, job dispatch, and result
//! reconciliation.
//!
//! Two long-lived loops share the record store:
//!
//! - [`Synchronizer`]: polls the backend for pending work, deduplicates
//!   against existing dispatch records, fills the content cache, and
//!   publishes job requests. At-most-one in-flight dispatch per step.
//! - [`ResultReconciler`]: consumes result (and status) events, updates the
//!   record, and forwards to the backend; failed result events are
//!   republished after a fixed delay instead of being dropped.

pub mod reconciler;
pub mod synchronizer;

pub use reconciler::ResultReconciler;
pub use synchronizer::Synchronizer;
