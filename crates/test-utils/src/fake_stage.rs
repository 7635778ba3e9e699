//! Scriptable stage bodies registered under `fake-build` / `fake-deploy`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use stagehand::errors::{PipelineError, Result};
use stagehand::stage::{BoxFuture, StageBody, StageContext, StageRegistry};
use stagehand::types::StageKind;
use tokio::sync::Notify;

/// What a fake stage does when run.
#[derive(Debug, Clone)]
pub enum FakeBehaviour {
    Succeed,
    /// The body returns an error after it was started.
    Fail(String),
    /// `check_preconditions` rejects the run.
    RejectPrecondition(String),
    /// Signal `entered`, then wait for `release` before succeeding.
    Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    },
}

/// Shared script + call log for every fake stage in a registry.
#[derive(Debug, Clone, Default)]
pub struct FakeStages {
    behaviours: Arc<Mutex<BTreeMap<String, FakeBehaviour>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeStages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how stage `name` behaves from now on. Unscripted stages succeed.
    pub fn script(&self, name: &str, behaviour: FakeBehaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.to_string(), behaviour);
    }

    /// Calls in order, e.g. `run:site:<release>`, `rollback:site`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Stage names whose body ran, in order.
    pub fn runs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| {
                c.strip_prefix("run:")
                    .and_then(|rest| rest.split(':').next())
                    .map(str::to_string)
            })
            .collect()
    }

    /// Registry with the built-in drivers plus `fake-build` and `fake-deploy`.
    pub fn registry(&self) -> StageRegistry {
        let mut registry = StageRegistry::with_builtin();
        for (driver, kind) in [("fake-build", StageKind::Build), ("fake-deploy", StageKind::Deploy)] {
            let stages = self.clone();
            registry.register(driver, move |name, _cfg, _config| {
                Ok(Arc::new(FakeStage {
                    name: name.to_string(),
                    kind,
                    stages: stages.clone(),
                }))
            });
        }
        registry
    }

    fn behaviour(&self, name: &str) -> FakeBehaviour {
        self.behaviours
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(FakeBehaviour::Succeed)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct FakeStage {
    name: String,
    kind: StageKind,
    stages: FakeStages,
}

impl StageBody for FakeStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn check_preconditions(&self, ctx: &StageContext) -> Result<()> {
        if let FakeBehaviour::RejectPrecondition(reason) = self.stages.behaviour(&self.name) {
            return Err(PipelineError::precondition(&ctx.stage, reason));
        }
        Ok(())
    }

    fn run<'a>(&'a self, ctx: &'a StageContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.stages
                .record(format!("run:{}:{}", self.name, ctx.release.unique_id()));
            ctx.log(format!("fake {} running", self.name));

            match self.stages.behaviour(&self.name) {
                FakeBehaviour::Fail(reason) => Err(PipelineError::StageFailed {
                    stage: self.name.clone(),
                    reason,
                }),
                FakeBehaviour::Gate { entered, release } => {
                    entered.notify_one();
                    release.notified().await;
                    Ok(())
                }
                FakeBehaviour::Succeed | FakeBehaviour::RejectPrecondition(_) => Ok(()),
            }
        })
    }

    fn rollback(&self, _ctx: &StageContext) -> Result<()> {
        self.stages.record(format!("rollback:{}", self.name));
        Ok(())
    }
}
