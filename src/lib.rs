pub mod config;
pub mod docker;
pub mod env;
pub mod error;
pub mod frames;
pub mod logs;
pub mod release;
pub mod startup;
pub mod util;

pub use error::{Error, Result};
