pub mod models {
    pub mod touch;
}

pub mod attributes;
pub mod boiler;
pub mod client;
pub mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod sensor;
pub mod transport;
pub mod utils;

pub use boiler::{Boiler, BoilerStatus, ForceState};
pub use client::{ClientOptions, Selector, TouchClient, TouchError};
pub use models::touch::OperationMode;
pub use sensor::AmbientSensor;
