//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod logging;
pub mod scheduled_tasks;

pub use deps::{build_notifier, build_orchestrator, ServerDeps};
pub use logging::init_tracing;
pub use scheduled_tasks::{refresh_registry, start_scheduler};
