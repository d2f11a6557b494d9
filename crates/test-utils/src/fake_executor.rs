use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use eltflow::dag::DispatchedTask;
use eltflow::engine::{RuntimeEvent, TaskOutcome};
use eltflow::exec::ExecutorBackend;
use eltflow::errors::Result;

/// A fake executor that:
/// - records which tasks were dispatched, with their first attempt number
/// - immediately reports `TaskFinished` for each of them, succeeding unless
///   an outcome was scripted for the task.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(String, u32)>>>,
    outcomes: HashMap<String, TaskOutcome>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, u32)>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
        }
    }

    pub fn with_outcome(mut self, task: &str, outcome: TaskOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<DispatchedTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes = self.outcomes.clone();

        Box::pin(async move {
            for t in tasks {
                let name = t.name().to_string();
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push((name.clone(), t.first_attempt));
                }

                let outcome = outcomes.get(&name).cloned().unwrap_or(TaskOutcome::Succeeded {
                    attempts: t.first_attempt,
                });
                tx.send(RuntimeEvent::TaskFinished {
                    task: name,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
