// ABOUTME: produces copies of plans and results with secrets and payload bytes replaced by a marker.
// ABOUTME: structure and keys survive so audit lines still show what was asked and what happened.

use crate::plan::{Action, ActionPlan};
use crate::result::{ActionPlanResult, ActionResult};
use crate::validate::MAX_MODE_BYTES;

pub const REDACTED: &str = "[redacted]";

impl ActionPlan {
    /// Replaces the confirmation token, exec env values and write_file content.
    /// An oversized mode string is replaced too.
    pub fn redacted(&self) -> ActionPlan {
        let mut plan = self.clone();
        if plan.mode.len() > MAX_MODE_BYTES {
            plan.mode = REDACTED.to_string();
        }
        if let Some(confirmation) = plan.confirmation.as_mut() {
            confirmation.token = REDACTED.to_string();
        }
        for action in &mut plan.actions {
            match action {
                Action::Exec(exec) => {
                    if let Some(env) = exec.env.as_mut() {
                        for value in env.values_mut() {
                            *value = REDACTED.to_string();
                        }
                    }
                }
                Action::WriteFile(write) => write.content = REDACTED.to_string(),
                _ => {}
            }
        }
        plan
    }
}

impl ActionPlanResult {
    /// Replaces captured process output and file content.
    pub fn redacted(&self) -> ActionPlanResult {
        let mut result = self.clone();
        for action in result.results.iter_mut().flatten() {
            match action {
                ActionResult::Exec(exec) => {
                    if !exec.stdout.is_empty() {
                        exec.stdout = REDACTED.to_string();
                    }
                    if !exec.stderr.is_empty() {
                        exec.stderr = REDACTED.to_string();
                    }
                }
                ActionResult::ReadFile(read) => {
                    if read.content_base64.is_some() {
                        read.content_base64 = Some(REDACTED.to_string());
                    }
                }
                _ => {}
            }
        }
        result
    }
}
