// src/config/validate.rs

use globset::Glob;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, EXPORT_STAGE, RawConfigFile};
use crate::errors::{PipelineError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipelineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.pipeline, raw.export, raw.stage))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages(cfg)?;
    validate_pipeline_section(cfg)?;
    validate_exports(cfg)?;
    validate_stages(cfg)?;
    validate_stage_dependencies(cfg)?;
    validate_graph(cfg)?;
    Ok(())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(PipelineError::ConfigError(
            "config must contain at least one [stage.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawConfigFile) -> Result<()> {
    let p = &cfg.pipeline;

    if p.keep_releases == 0 {
        return Err(PipelineError::ConfigError(
            "[pipeline].keep_releases must be >= 1 (got 0)".to_string(),
        ));
    }
    if p.staleness_secs == 0 {
        return Err(PipelineError::ConfigError(
            "[pipeline].staleness_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if p.run_mode.trim().is_empty() {
        return Err(PipelineError::ConfigError(
            "[pipeline].run_mode must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_exports(cfg: &RawConfigFile) -> Result<()> {
    for (name, export) in cfg.export.iter() {
        if export.cmd.trim().is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "export '{}' has an empty `cmd`",
                name
            )));
        }
        validate_globs(&format!("export '{name}' scope"), &export.scope)?;
    }
    Ok(())
}

fn validate_stages(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        if name == EXPORT_STAGE {
            return Err(PipelineError::ConfigError(format!(
                "stage name '{}' is reserved",
                EXPORT_STAGE
            )));
        }

        if stage.kind().is_none() {
            return Err(PipelineError::UnknownDriver {
                stage: name.clone(),
                driver: stage.driver.clone(),
            });
        }

        if stage.driver.starts_with("shell-")
            && stage.cmd.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(PipelineError::ConfigError(format!(
                "stage '{}' uses driver '{}' and requires `cmd`",
                name, stage.driver
            )));
        }

        if stage.driver == "copy-deploy" && stage.target_dir.is_none() {
            return Err(PipelineError::ConfigError(format!(
                "stage '{}' uses driver 'copy-deploy' and requires `target_dir`",
                name
            )));
        }

        if stage.timeout_secs == 0 {
            return Err(PipelineError::ConfigError(format!(
                "stage '{}' timeout_secs must be >= 1 (got 0)",
                name
            )));
        }

        validate_globs(&format!("stage '{name}' trigger"), &stage.trigger)?;
        validate_globs(&format!("stage '{name}' exclude"), &stage.exclude)?;
    }
    Ok(())
}

fn validate_globs(what: &str, patterns: &[String]) -> Result<()> {
    for pat in patterns {
        Glob::new(pat).map_err(|e| {
            PipelineError::ConfigError(format!("{what}: invalid glob pattern '{pat}': {e}"))
        })?;
    }
    Ok(())
}

fn validate_stage_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, stage) in cfg.stage.iter() {
        for dep in stage.after.iter() {
            if dep == name {
                return Err(PipelineError::ConfigError(format!(
                    "stage '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if dep != EXPORT_STAGE && !cfg.stage.contains_key(dep) {
                return Err(PipelineError::ConfigError(format!(
                    "stage '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: upstream -> stage, with `export` as the implicit root.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    graph.add_node(EXPORT_STAGE);
    for name in cfg.stage.keys() {
        graph.add_node(name.as_str());
    }

    for (name, stage) in cfg.stage.iter() {
        for dep in stage.upstream() {
            graph.add_edge(dep, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(PipelineError::StageCycle(format!(
                "cycle detected in stage graph involving stage '{}'",
                node
            )))
        }
    }
}
