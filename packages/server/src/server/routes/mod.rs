pub mod dlq;
pub mod health;
pub mod jobs;

pub use dlq::{list_dlq_handler, purge_handler, requeue_handler};
pub use health::health_handler;
pub use jobs::{enqueue_handler, get_job_handler};
