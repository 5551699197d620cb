//! Application layer for tfgate.
//!
//! The app layer coordinates adapters and domain logic.
//! It does not parse CLI flags and it does not do filesystem I/O.

mod render;
mod scenario;

pub use render::{github_annotations, render_markdown};
pub use scenario::{CancelFlag, ScenarioOutcome, ScenarioUseCase, TeardownGuard};

pub trait Clock: Send + Sync {
    fn now_rfc3339(&self) -> String;
}

#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_rfc3339(&self) -> String {
        use time::format_description::well_known::Rfc3339;
        time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    }
}
