//! The submission cycle.
//!
//! Once per period: expire stale flags, fetch the queue, group by
//! (exploit, target), pick a fair-share batch, dispatch it to the
//! configured scoring backend, and persist the outcomes.

mod dispatcher;
mod worker;

pub use dispatcher::dispatch;
pub use worker::SubmitWorker;
