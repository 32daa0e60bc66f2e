//! Notification intake and delivery.
//!
//! [`PushEngine`] is the cloneable front door used by request handlers.
//! Each engine owns one [`DeliveryWorker`] task which holds the gateway
//! connection and the pending/history queues. Nothing else touches either.

mod engine;
mod payload;
mod worker;

pub use engine::{PushEngine, Submission, SubmitError};
pub use payload::{PayloadTemplate, TemplateError};
pub use worker::{DeliveryWorker, WorkerOptions, WorkerStats};
