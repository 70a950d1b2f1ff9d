//! Dispatch module - job/reply wire types and the request/reply dispatch core

pub mod dispatcher;
pub mod job;
pub mod reply;

pub use dispatcher::{classify_attempt, AttemptOutcome, DispatchPolicy, Dispatcher};
pub use job::{ComposeJob, ImageJob, Job, JobDecodeError, TextToImageJob, MAX_COMPOSE_IMAGES};
pub use reply::Reply;

/// Work queue shared by the dispatch core and the workers
pub const GENERATION_QUEUE: &str = "generation";
