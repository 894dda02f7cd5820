//! Palaver ABI crate: contracts shared by the session core and inference backends.

pub mod backend;
pub mod config;
pub mod context;
pub mod sampling;

pub use backend::*;
pub use config::*;
pub use context::*;
pub use sampling::*;
