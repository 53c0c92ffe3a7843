pub mod orchestrator;
pub mod resolver;

pub use orchestrator::{select_profiles, Session};
pub use resolver::ResolutionPolicy;
