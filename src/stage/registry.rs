// src/stage/registry.rs

//! Explicit driver registry.
//!
//! Stage implementations are looked up by the `driver` id in
//! `[stage.<name>]`. The registry is filled once at start-up;
//! [`StageRegistry::with_builtin`] registers the drivers shipped with the
//! crate, and embedders (and tests) can `register` their own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigFile, StageConfig};
use crate::errors::{PipelineError, Result};
use crate::stage::StageBody;
use crate::stage::drivers::{CopyDeployer, ShellBuilder, ShellDeployer};

/// Builds a stage body from its name, its section and the whole config.
pub type StageFactory =
    Arc<dyn Fn(&str, &StageConfig, &ConfigFile) -> Result<Arc<dyn StageBody>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<String, StageFactory>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("drivers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `shell-build`, `shell-deploy` and `copy-deploy`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register("shell-build", |name, cfg, _| {
                Ok(Arc::new(ShellBuilder::from_config(name, cfg)?))
            })
            .register("shell-deploy", |name, cfg, _| {
                Ok(Arc::new(ShellDeployer::from_config(name, cfg)?))
            })
            .register("copy-deploy", |name, cfg, config| {
                Ok(Arc::new(CopyDeployer::from_config(name, cfg, config)?))
            });
        registry
    }

    pub fn register<F>(&mut self, driver: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &StageConfig, &ConfigFile) -> Result<Arc<dyn StageBody>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(driver.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, driver: &str) -> bool {
        self.factories.contains_key(driver)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }

    /// Instantiate the body for stage `name`.
    pub fn create(
        &self,
        name: &str,
        cfg: &StageConfig,
        config: &ConfigFile,
    ) -> Result<Arc<dyn StageBody>> {
        let factory = self
            .factories
            .get(&cfg.driver)
            .ok_or_else(|| PipelineError::UnknownDriver {
                stage: name.to_string(),
                driver: cfg.driver.clone(),
            })?;
        factory(name, cfg, config)
    }
}
