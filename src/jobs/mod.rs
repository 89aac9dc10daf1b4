//! Device-jobs protocol: topics, documents, custom actions.
//!
//! Update jobs (id prefix `AFR_OTA`) go to the update engine; every other
//! job is a *custom* job, staged by the job-message callback and executed
//! by the [`worker::JobWorker`] through the [`action::JobActionDispatcher`].

pub mod action;
pub mod document;
pub mod topics;
pub mod worker;
