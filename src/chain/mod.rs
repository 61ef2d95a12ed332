//! Chain Runner (C8): linear composition with data merge and interrupt.
//!
//! Grounded on the teacher's `execute_sequential` loop (step-by-step, halt
//! on hard failure) generalized to a proper `Err` return instead of
//! `std::process::exit`, and on `other_examples`' chained-stage composition
//! (merged running state between stages).

use std::sync::Arc;

use thiserror::Error;

use crate::action::Action;
use crate::context::{Context, Params};
use crate::error::{ExecutionError, RunOutcome};
use crate::executor::{ExecuteOptions, Executor};

/// One link in the chain: an action plus the extra params merged in on top
/// of the running state before this step runs.
pub struct ChainStep {
    pub action: Arc<dyn Action>,
    pub extra_params: Params,
}

impl ChainStep {
    pub fn new(action: Arc<dyn Action>) -> Self {
        Self {
            action,
            extra_params: Params::new(),
        }
    }

    pub fn with_params(action: Arc<dyn Action>, extra_params: Params) -> Self {
        Self {
            action,
            extra_params,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("step '{step}' failed: {error}")]
    StepFailed {
        step: String,
        error: ExecutionError,
    },
}

#[derive(Debug)]
pub enum ChainOutcome {
    Ok(Params),
    Interrupted(Params),
    Err(ChainError),
}

/// A caller-supplied predicate consulted before each step; returning `true`
/// halts the chain with `{interrupted, current_params}` (§4.8).
pub type InterruptCheck = Box<dyn Fn(&Params) -> bool + Send + Sync>;

#[derive(Default)]
pub struct ChainOptions {
    pub interrupt_check: Option<InterruptCheck>,
    pub execute_options: ExecuteOptions,
}

/// Runs `steps` in order. On success, shallow-merges each step's result map
/// into the running params (result keys overwrite) before the next step
/// (I8, §4.8). Halts on first error or first interrupt; halted steps never
/// execute.
pub async fn run_chain(
    steps: Vec<ChainStep>,
    initial_params: Params,
    opts: ChainOptions,
) -> ChainOutcome {
    let mut running = initial_params;

    for step in steps {
        if let Some(check) = &opts.interrupt_check {
            if check(&running) {
                return ChainOutcome::Interrupted(running);
            }
        }

        let step_name = step.action.metadata().name;
        let mut merged = running.clone();
        for (k, v) in step.extra_params {
            merged.insert(k, v);
        }
        running = merged.clone();

        let outcome = Executor::execute(
            step.action.clone(),
            merged,
            Context::new(),
            opts.execute_options.clone(),
        )
        .await;

        match outcome {
            RunOutcome::Ok { data, .. } => {
                for (k, v) in data {
                    running.insert(k, v);
                }
            }
            RunOutcome::Err { error, .. } => {
                return ChainOutcome::Err(ChainError::StepFailed {
                    step: step_name,
                    error,
                });
            }
        }
    }

    ChainOutcome::Ok(running)
}
