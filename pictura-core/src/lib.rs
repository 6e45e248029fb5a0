pub mod backend;
pub mod client;
pub mod config;
pub mod credential;
pub mod device_map;
pub mod error;
pub mod flux;
pub mod invoker;
pub mod loader;
pub mod params;
pub mod presenter;
pub mod prompt;
pub mod result;
pub mod session;
mod util;

pub use backend::*;
pub use client::InferenceClient;
pub use config::*;
pub use credential::*;
pub use device_map::*;
pub use error::{Error, Result};
pub use flux::{FluxLoader, FluxVariant};
pub use invoker::GenerationInvoker;
pub use loader::*;
pub use params::*;
pub use presenter::*;
pub use prompt::*;
pub use result::*;
pub use session::*;
pub use util::*;
