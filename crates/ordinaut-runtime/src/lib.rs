pub mod coordinator;
pub mod ingress;
pub mod scheduler;
pub mod service;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use ingress::EventIngress;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use service::{run_service, Service};
pub use worker::{Worker, WorkerConfig};
