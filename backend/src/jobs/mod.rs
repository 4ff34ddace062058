//! Asynchronous preprocessing jobs.
//!
//! - Registry: job records and their state machine
//! - Worker: queue and worker pool that execute jobs
//! - Events: broadcast of job changes for live streaming

pub mod events;
pub mod registry;
pub mod worker;

pub use events::{JobEvent, JobEvents};
pub use registry::{Job, JobHandle, JobRegistry, JobResult, JobState};
pub use worker::{execute_job, job_queue, spawn_workers, JobQueue, JobReceiver};
