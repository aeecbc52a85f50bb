pub mod app_config;
pub mod clock;
pub mod config;
pub mod guard;
pub mod handler;
pub mod import;
pub mod media;
pub mod platform;
pub mod relay;
pub mod resolver;
pub mod running;
pub mod store;
pub mod trigger;

pub use config::RelayConfig;
pub use guard::{AbandonReason, Guard, GuardError};
pub use relay::{Outcome, Relay, RelayError};
pub use trigger::Trigger;
