//! Dependency resolution over a step list.
//!
//! [`resolve`] is pure: it reads statuses and reports what the scheduler
//! should do next. The executor applies the result on every tick.

use std::collections::HashMap;

use stepflow_core::error::Result;

use crate::plan::Step;
use crate::status::StepStatus;

/// Outcome of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Pending steps whose dependencies are all Completed, in step order.
    pub runnable: Vec<String>,
    /// Pending steps that must be skipped, with the reason, in step order.
    pub skipped: Vec<(String, String)>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.runnable.is_empty() && self.skipped.is_empty()
    }
}

/// Compute runnable and cascade-skipped steps.
///
/// A Pending step with a Failed or Skipped dependency is skipped, and the
/// skip propagates through a scratch overlay until a pass changes nothing,
/// so a chain `a <- b <- c` with `a` Failed skips both `b` and `c` in one
/// call. Unknown dependency ids never satisfy; validation rejects them
/// before scheduling.
pub fn resolve(steps: &[Step]) -> Resolution {
    let mut overlay: HashMap<&str, StepStatus> =
        steps.iter().map(|s| (s.id.as_str(), s.status())).collect();
    let mut skipped = Vec::new();

    loop {
        let mut changed = false;
        for step in steps {
            if overlay.get(step.id.as_str()) != Some(&StepStatus::Pending) {
                continue;
            }
            let blocker = step.depends_on.iter().find_map(|dep| {
                match overlay.get(dep.as_str()) {
                    Some(StepStatus::Failed) => Some(format!("dependency {} failed", dep)),
                    Some(StepStatus::Skipped) => Some(format!("dependency {} was skipped", dep)),
                    _ => None,
                }
            });
            if let Some(reason) = blocker {
                overlay.insert(step.id.as_str(), StepStatus::Skipped);
                skipped.push((step.id.clone(), reason));
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Report skips in step order regardless of which pass found them.
    let order: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();
    skipped.sort_by_key(|(id, _)| order.get(id.as_str()).copied().unwrap_or(usize::MAX));

    let runnable = steps
        .iter()
        .filter(|s| overlay.get(s.id.as_str()) == Some(&StepStatus::Pending))
        .filter(|s| {
            s.depends_on
                .iter()
                .all(|dep| overlay.get(dep.as_str()) == Some(&StepStatus::Completed))
        })
        .map(|s| s.id.clone())
        .collect();

    Resolution { runnable, skipped }
}

/// Put every non-Completed step back to Pending with its error cleared.
///
/// A step left Running by an interrupted run is failed first so the
/// transition table is respected. Returns the ids that were re-queued.
pub fn requeue_for_resume(steps: &mut [Step]) -> Result<Vec<String>> {
    let mut requeued = Vec::new();
    for step in steps.iter_mut() {
        match step.status() {
            StepStatus::Completed | StepStatus::Pending => continue,
            StepStatus::Running => {
                step.mark_failed("interrupted")?;
                step.requeue()?;
            }
            StepStatus::Failed | StepStatus::Skipped => step.requeue()?,
        }
        requeued.push(step.id.clone());
    }
    Ok(requeued)
}
