mod cert_config;
mod duration;
mod error;
mod main_config;

pub use cert_config::*;
pub use error::*;
pub use main_config::*;
