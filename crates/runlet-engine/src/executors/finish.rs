// Finish executor
//
// Marks the session done. The terminal done event is published by the
// engine after step_complete so it is always the last event in the log.

use runlet_core::{Result, Session, SessionStatus};

use super::{Executors, StepOutcome};

impl Executors {
    pub(crate) async fn execute_finish(
        &self,
        reason: &str,
        reason_detail: Option<&str>,
        mut state: Session,
    ) -> Result<StepOutcome> {
        state.status = SessionStatus::Done;
        state.clear_pending();
        state.touch();

        Ok(StepOutcome {
            state,
            events: Vec::new(),
            next_context: None,
            cost_delta: 0.0,
            finish_reason: Some((reason.to_string(), reason_detail.map(str::to_string))),
        })
    }
}
