pub mod config;
pub mod cycle;
pub mod mqtt;
pub mod value;

mod error;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
