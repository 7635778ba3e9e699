// src/config/mod.rs

//! Configuration model, loading and validation.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, EXPORT_STAGE, ExportConfig, PipelineSection, RawConfigFile, StageConfig,
};
