//! Configuration loading and validation for the playback runtime.

mod loader;
mod types;
mod validator;

pub use loader::CONFIG_ENV_VAR;
pub use types::*;
pub use validator::ConfigValidator;
