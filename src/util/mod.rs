//! Process plumbing shared by the server binary.
//!
//! - [`literal_or_env`] - Config values given literally or as `$VAR` references
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - Logging subscriber and HTTP trace layer

pub mod literal_or_env;
pub mod sig_down;
pub mod telemetry;

pub use literal_or_env::LiteralOrEnv;
pub use sig_down::SigDown;
pub use telemetry::Telemetry;
