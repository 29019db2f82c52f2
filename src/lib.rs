pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod processor;
pub mod publisher;
pub mod retry;

pub use engine::BatchEngine;
pub use error::{EngineError, EngineResult, PublishError};
