use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ClimError;
use crate::loader::Deferred;
use crate::pipeline::{ProgressEvent, ProgressSink};

/// What to do when one node of a batch fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// The first error aborts the batch; nodes not yet started are skipped.
    #[default]
    FailFast,
    /// Failed nodes are left out of the result and reported separately.
    SkipFailed,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::SkipFailed => write!(f, "skip-failed"),
        }
    }
}

#[derive(Debug)]
pub struct Realized<K, T> {
    pub values: BTreeMap<K, T>,
    pub failures: Vec<(K, ClimError)>,
}

/// Runs batches of deferred nodes on a bounded worker pool.
pub struct GraphExecutor {
    pool: ThreadPool,
    workers: usize,
    policy: FailurePolicy,
}

impl GraphExecutor {
    pub fn new(workers: usize, policy: FailurePolicy) -> Result<Self, ClimError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("cmip-clim-worker-{index}"))
            .build()
            .map_err(|err| ClimError::Executor(err.to_string()))?;
        Ok(Self {
            pool,
            workers,
            policy,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Forces every node and returns once all of them finished or the batch
    /// was aborted.
    pub fn realize_all<K, T>(
        &self,
        stage: &str,
        nodes: BTreeMap<K, Deferred<T>>,
        sink: &dyn ProgressSink,
    ) -> Result<Realized<K, T>, ClimError>
    where
        K: Ord + Send + fmt::Display,
        T: Send,
    {
        let total = nodes.len();
        let started = Instant::now();
        let cancelled = AtomicBool::new(false);
        let done = AtomicUsize::new(0);
        let first_error = Mutex::new(None::<ClimError>);
        let fail_fast = self.policy == FailurePolicy::FailFast;
        tracing::info!(stage, nodes = total, workers = self.workers, "realizing batch");

        let outcomes = self.pool.install(|| {
            nodes
                .into_par_iter()
                .map(|(key, node)| {
                    if fail_fast && cancelled.load(Ordering::SeqCst) {
                        return (key, None);
                    }
                    let label = node.label().to_string();
                    let result = node.force();
                    let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::debug!(stage, node = %label, ok = result.is_ok(), "node finished");
                    sink.event(ProgressEvent {
                        message: format!("phase={stage}; {finished}/{total} {label}"),
                        elapsed: Some(started.elapsed()),
                    });
                    match result {
                        Err(err) if fail_fast => {
                            cancelled.store(true, Ordering::SeqCst);
                            if let Ok(mut slot) = first_error.lock() {
                                slot.get_or_insert(err);
                            }
                            (key, None)
                        }
                        other => (key, Some(other)),
                    }
                })
                .collect::<Vec<_>>()
        });

        let first_error = first_error
            .into_inner()
            .map_err(|_| ClimError::Executor("error slot poisoned".to_string()))?;
        if let Some(err) = first_error {
            return Err(err);
        }

        let mut realized = Realized {
            values: BTreeMap::new(),
            failures: Vec::new(),
        };
        for (key, outcome) in outcomes {
            match outcome {
                Some(Ok(value)) => {
                    realized.values.insert(key, value);
                }
                Some(Err(err)) => {
                    tracing::warn!(stage, node = %key, error = %err, "skipping failed node");
                    realized.failures.push((key, err));
                }
                None => {}
            }
        }
        Ok(realized)
    }
}
