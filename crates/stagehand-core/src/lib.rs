pub mod config;
pub mod token;
pub mod types;

pub use config::StagehandConfig;
pub use token::generate_token;
pub use types::*;
