//! Compensable action pipeline.
//!
//! A pipeline is an ordered list of named steps executed against one
//! shared, mutable context. Steps run strictly in order; later steps
//! depend on side effects of earlier ones. On the first failure the
//! pipeline unwinds: compensations of the steps that already completed run
//! in reverse order, the failed step's own compensation does not run, and
//! the step's error is returned to the caller unchanged.
//!
//! Compensations are best-effort cleanup; their own failures are logged
//! but never mask the original error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ProvisionError;

/// A named step with a forward procedure and an optional compensation.
#[async_trait]
pub trait Action<Ctx: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn forward(&self, ctx: &mut Ctx) -> Result<(), ProvisionError>;

    /// Undo a completed forward step. Default is a no-op for steps that
    /// are observational or terminal.
    async fn backward(&self, _ctx: &mut Ctx) {}
}

/// An ordered, compensable sequence of actions.
pub struct Pipeline<Ctx: Send> {
    actions: Vec<Arc<dyn Action<Ctx>>>,
}

impl<Ctx: Send> Pipeline<Ctx> {
    pub fn new(actions: Vec<Arc<dyn Action<Ctx>>>) -> Self {
        Self { actions }
    }

    /// Run every action forward, in order. On the first failure, run the
    /// compensations of the completed actions in reverse and return the
    /// failure.
    pub async fn execute(&self, ctx: &mut Ctx) -> Result<(), ProvisionError> {
        for (index, action) in self.actions.iter().enumerate() {
            debug!(step = action.name(), "pipeline step forward");
            if let Err(err) = action.forward(ctx).await {
                warn!(step = action.name(), error = %err, "pipeline step failed, unwinding");
                for completed in self.actions[..index].iter().rev() {
                    debug!(step = completed.name(), "pipeline step backward");
                    completed.backward(ctx).await;
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputeError;

    /// Records forward/backward invocations in order, optionally failing
    /// its forward step.
    struct Step {
        name: &'static str,
        fail: bool,
    }

    #[derive(Default)]
    struct Trace {
        calls: Vec<String>,
    }

    #[async_trait]
    impl Action<Trace> for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn forward(&self, ctx: &mut Trace) -> Result<(), ProvisionError> {
            if self.fail {
                return Err(ComputeError::Api(format!("{} blew up", self.name)).into());
            }
            ctx.calls.push(format!("+{}", self.name));
            Ok(())
        }

        async fn backward(&self, ctx: &mut Trace) {
            ctx.calls.push(format!("-{}", self.name));
        }
    }

    fn step(name: &'static str, fail: bool) -> Arc<dyn Action<Trace>> {
        Arc::new(Step { name, fail })
    }

    #[tokio::test]
    async fn all_steps_run_in_order() {
        let pipeline = Pipeline::new(vec![step("a", false), step("b", false), step("c", false)]);
        let mut ctx = Trace::default();

        pipeline.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.calls, vec!["+a", "+b", "+c"]);
    }

    #[tokio::test]
    async fn failure_unwinds_completed_steps_in_reverse() {
        let pipeline = Pipeline::new(vec![
            step("a", false),
            step("b", false),
            step("c", true),
            step("d", false),
        ]);
        let mut ctx = Trace::default();

        let err = pipeline.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Compute(ComputeError::Api(ref m)) if m == "c blew up"));

        // a and b ran forward, then b and a compensated; c's own
        // compensation did not run, and d never ran at all.
        assert_eq!(ctx.calls, vec!["+a", "+b", "-b", "-a"]);
    }

    #[tokio::test]
    async fn first_step_failure_compensates_nothing() {
        let pipeline = Pipeline::new(vec![step("a", true), step("b", false)]);
        let mut ctx = Trace::default();

        pipeline.execute(&mut ctx).await.unwrap_err();
        assert!(ctx.calls.is_empty());
    }

    #[tokio::test]
    async fn empty_pipeline_succeeds() {
        let pipeline: Pipeline<Trace> = Pipeline::new(vec![]);
        let mut ctx = Trace::default();
        pipeline.execute(&mut ctx).await.unwrap();
    }
}
