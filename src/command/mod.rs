mod error;
pub mod server;
pub mod trust;

pub use error::Error;
