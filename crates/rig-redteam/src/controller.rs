//! Refinement Controller
//!
//! Drives Supervisor → Evaluator passes until a draft is accepted or the
//! refinement budget runs out.
//!
//! ```text
//! Scoping ──BriefReady──▶ Researching ──DraftReady──▶ Evaluating ──Accept──▶ Accepted
//!                             ▲                           │
//!                             │                         Refine
//!                       GuidanceReady                     │
//!                             │            budget left    ▼   budget spent
//!                          Refining ◀──────────────────── ? ──────────────▶ Exhausted
//! ```
//!
//! Any `Fatal` event moves to `Errored`. Phases only change through the
//! pure [`next_phase`] function.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{FatalCause, RefinementError, Stage};
use crate::evaluator::Evaluator;
use crate::scoping::{Clarification, ScopingCoordinator};
use crate::state::{DraftReport, EvaluationResult, ResearchBrief, Verdict};
use crate::supervisor::{Guidance, Supervisor};
use crate::usage::UsageTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scoping,
    Researching,
    Evaluating,
    Refining,
    Accepted,
    Exhausted,
    Errored,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Accepted | Phase::Exhausted | Phase::Errored)
    }

    fn stage(&self) -> Stage {
        match self {
            Phase::Scoping => Stage::Scoping,
            Phase::Researching => Stage::Researching,
            Phase::Evaluating => Stage::Evaluating,
            Phase::Refining => Stage::Refining,
            Phase::Accepted | Phase::Exhausted | Phase::Errored => Stage::Finished,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Something that happened in the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    BriefReady,
    DraftReady,
    Evaluated(Verdict),
    GuidanceReady,
    Fatal,
}

/// Transition table. `iteration` is the number of refinement passes
/// already started; `None` means the event is not valid in `phase`.
pub fn next_phase(phase: Phase, event: Event, iteration: u32, max_iterations: u32) -> Option<Phase> {
    match (phase, event) {
        (Phase::Scoping, Event::BriefReady) => Some(Phase::Researching),
        (Phase::Researching, Event::DraftReady) => Some(Phase::Evaluating),
        (Phase::Evaluating, Event::Evaluated(Verdict::Accept)) => Some(Phase::Accepted),
        (Phase::Evaluating, Event::Evaluated(Verdict::Refine)) => {
            if iteration >= max_iterations {
                Some(Phase::Exhausted)
            } else {
                Some(Phase::Refining)
            }
        }
        (Phase::Refining, Event::GuidanceReady) => Some(Phase::Researching),
        (phase, Event::Fatal) if !phase.is_terminal() => Some(Phase::Errored),
        _ => None,
    }
}

/// How the loop ended when it produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Accepted,
    Exhausted,
}

/// A draft together with its evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedDraft {
    pub draft: DraftReport,
    pub evaluation: EvaluationResult,
}

/// Best entry of a history: accepted drafts first, then highest
/// objectivity; ties go to the most recent.
pub fn best_of(history: &[EvaluatedDraft]) -> Option<&EvaluatedDraft> {
    history.iter().fold(None, |best: Option<&EvaluatedDraft>, entry| match best {
        Some(best) if rank(best) > rank(entry) => Some(best),
        _ => Some(entry),
    })
}

fn rank(entry: &EvaluatedDraft) -> (bool, f64) {
    (entry.evaluation.is_accept(), entry.evaluation.objectivity)
}

/// Final product of a loop that did not error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub final_draft: DraftReport,
    pub final_evaluation: EvaluationResult,
    pub terminal: Terminal,
    /// Refinement passes started
    pub iterations: u32,
    pub history: Vec<EvaluatedDraft>,
}

impl RefinementOutcome {
    pub fn is_exhausted(&self) -> bool {
        self.terminal == Terminal::Exhausted
    }
}

/// Loop state, owned by one `drive` call
struct RefinementState {
    phase: Phase,
    current: Option<DraftReport>,
    history: Vec<EvaluatedDraft>,
    iteration: u32,
    terminal: bool,
}

impl RefinementState {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            current: None,
            history: Vec::new(),
            iteration: 0,
            terminal: false,
        }
    }

    fn advance(&mut self, event: Event, max_iterations: u32) -> Result<Phase, RefinementError> {
        let Some(next) = next_phase(self.phase, event, self.iteration, max_iterations) else {
            return Err(self.fatal(FatalCause::IllegalTransition {
                from: self.phase.to_string(),
                event: format!("{:?}", event),
            }));
        };

        info!(from = %self.phase, to = %next, iteration = self.iteration, "phase transition");
        self.phase = next;
        if next.is_terminal() {
            self.terminal = true;
        }
        Ok(next)
    }

    fn fatal(&self, cause: impl Into<FatalCause>) -> RefinementError {
        RefinementError::new(self.phase.stage(), self.iteration, cause).with_evaluated_drafts(self.history.len())
    }

    /// Move to `Errored` and build the error
    fn fail(&mut self, cause: impl Into<FatalCause>, max_iterations: u32) -> RefinementError {
        let error = self.fatal(cause);
        if let Err(illegal) = self.advance(Event::Fatal, max_iterations) {
            return illegal;
        }
        error
    }
}

enum BriefSource<'a> {
    Query {
        query: &'a str,
        clarification: Option<&'a Clarification>,
    },
    Ready(ResearchBrief),
}

pub struct RefinementController {
    scoping: ScopingCoordinator,
    supervisor: Supervisor,
    evaluator: Arc<dyn Evaluator>,
    max_iterations: u32,
    usage: Option<Arc<UsageTracker>>,
}

impl RefinementController {
    pub fn new(
        scoping: ScopingCoordinator,
        supervisor: Supervisor,
        evaluator: Arc<dyn Evaluator>,
        max_iterations: u32,
    ) -> Self {
        Self {
            scoping,
            supervisor,
            evaluator,
            max_iterations,
            usage: None,
        }
    }

    /// Log usage totals after every evaluation
    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run the loop for a query. With `initial_report` the loop starts by
    /// evaluating that text and only scopes the query if a refinement pass
    /// needs a brief.
    pub async fn run(
        &self,
        query: &str,
        clarification: Option<&Clarification>,
        initial_report: Option<&str>,
    ) -> Result<RefinementOutcome, RefinementError> {
        self.drive(BriefSource::Query { query, clarification }, initial_report)
            .await
    }

    /// Run the loop for an already scoped brief
    pub async fn run_with_brief(
        &self,
        brief: ResearchBrief,
        initial_report: Option<&str>,
    ) -> Result<RefinementOutcome, RefinementError> {
        self.drive(BriefSource::Ready(brief), initial_report).await
    }

    async fn drive(
        &self,
        source: BriefSource<'_>,
        initial_report: Option<&str>,
    ) -> Result<RefinementOutcome, RefinementError> {
        let max = self.max_iterations;
        let mut guidance: Option<Guidance> = None;
        let mut brief = match source {
            BriefSource::Ready(ref brief) => Some(brief.clone()),
            BriefSource::Query { .. } => None,
        };

        let mut state = match (initial_report, &brief) {
            (Some(text), _) => {
                info!("enrichment mode: evaluating the supplied report first");
                let mut state = RefinementState::new(Phase::Evaluating);
                state.current = Some(DraftReport::from_initial_report(text));
                state
            }
            (None, Some(_)) => RefinementState::new(Phase::Researching),
            (None, None) => RefinementState::new(Phase::Scoping),
        };

        while !state.terminal {
            match state.phase {
                Phase::Scoping => {
                    match self.scope(&source).await {
                        Ok(scoped) => brief = Some(scoped),
                        Err(e) => return Err(state.fail(e, max)),
                    }
                    state.advance(Event::BriefReady, max)?;
                }

                Phase::Researching => {
                    let Some(current_brief) = brief.as_ref() else {
                        return Err(state.fail(
                            FatalCause::IllegalTransition {
                                from: Phase::Researching.to_string(),
                                event: "research without a brief".to_string(),
                            },
                            max,
                        ));
                    };

                    match self
                        .supervisor
                        .run(current_brief, guidance.as_ref(), state.iteration)
                        .await
                    {
                        Ok(draft) => {
                            state.current = Some(draft);
                            state.advance(Event::DraftReady, max)?;
                        }
                        Err(e) => {
                            warn!(iteration = state.iteration, error = %e, "supervisor pass failed");
                            return Err(state.fail(e, max));
                        }
                    }
                }

                Phase::Evaluating => {
                    let Some(draft) = state.current.take() else {
                        return Err(state.fail(
                            FatalCause::IllegalTransition {
                                from: Phase::Evaluating.to_string(),
                                event: "evaluation without a draft".to_string(),
                            },
                            max,
                        ));
                    };

                    let evaluation = match self.evaluator.evaluate(&draft).await {
                        Ok(evaluation) => evaluation,
                        Err(e) => {
                            warn!(iteration = draft.iteration, error = %e, "evaluation failed, treating as refine");
                            EvaluationResult::failed(e)
                        }
                    };

                    let verdict = evaluation.verdict;
                    state.history.push(EvaluatedDraft { draft, evaluation });
                    self.log_progress(&state);
                    state.advance(Event::Evaluated(verdict), max)?;
                }

                Phase::Refining => {
                    if brief.is_none() {
                        match self.scope(&source).await {
                            Ok(scoped) => brief = Some(scoped),
                            Err(e) => return Err(state.fail(e, max)),
                        }
                    }

                    if let Some(last) = state.history.last() {
                        guidance = Some(Guidance::from_critique(&last.draft, &last.evaluation));
                    }
                    state.iteration += 1;
                    state.advance(Event::GuidanceReady, max)?;
                }

                Phase::Accepted | Phase::Exhausted | Phase::Errored => break,
            }
        }

        let terminal = match state.phase {
            Phase::Accepted => Terminal::Accepted,
            _ => Terminal::Exhausted,
        };

        let Some(best) = best_of(&state.history).cloned() else {
            return Err(state.fatal(FatalCause::IllegalTransition {
                from: state.phase.to_string(),
                event: "terminal without an evaluated draft".to_string(),
            }));
        };

        info!(
            terminal = ?terminal,
            iterations = state.iteration,
            drafts = state.history.len(),
            objectivity = best.evaluation.objectivity,
            "refinement finished"
        );

        Ok(RefinementOutcome {
            final_draft: best.draft,
            final_evaluation: best.evaluation,
            terminal,
            iterations: state.iteration,
            history: state.history,
        })
    }

    async fn scope(&self, source: &BriefSource<'_>) -> Result<ResearchBrief, crate::error::ScopingError> {
        match source {
            BriefSource::Ready(brief) => Ok(brief.clone()),
            BriefSource::Query { query, clarification } => {
                self.scoping.produce_brief(query, *clarification).await
            }
        }
    }

    fn log_progress(&self, state: &RefinementState) {
        if let Some(usage) = &self.usage {
            let summary = usage.summary();
            info!(
                iteration = state.iteration,
                calls = summary.total.calls,
                tokens = summary.total.tokens.total_tokens,
                cost_usd = summary.total.cost_usd,
                "usage so far"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(iteration: u32, objectivity: f64, verdict: Verdict) -> EvaluatedDraft {
        EvaluatedDraft {
            draft: DraftReport {
                body: format!("draft {iteration}"),
                citations: Default::default(),
                iteration,
                findings: Vec::new(),
                provenance: Default::default(),
            },
            evaluation: EvaluationResult {
                objectivity,
                bias: 0.5,
                source_quality: 0.5,
                issues: Vec::new(),
                verdict,
                unreachable_sources: Vec::new(),
            },
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert_eq!(next_phase(Phase::Scoping, Event::BriefReady, 0, 3), Some(Phase::Researching));
        assert_eq!(next_phase(Phase::Researching, Event::DraftReady, 0, 3), Some(Phase::Evaluating));
        assert_eq!(
            next_phase(Phase::Evaluating, Event::Evaluated(Verdict::Accept), 0, 3),
            Some(Phase::Accepted)
        );
    }

    #[test]
    fn test_refine_respects_budget() {
        let refine = Event::Evaluated(Verdict::Refine);
        assert_eq!(next_phase(Phase::Evaluating, refine, 0, 1), Some(Phase::Refining));
        assert_eq!(next_phase(Phase::Evaluating, refine, 1, 1), Some(Phase::Exhausted));
        assert_eq!(next_phase(Phase::Evaluating, refine, 0, 0), Some(Phase::Exhausted));
        assert_eq!(next_phase(Phase::Refining, Event::GuidanceReady, 1, 3), Some(Phase::Researching));
    }

    #[test]
    fn test_fatal_and_illegal_events() {
        assert_eq!(next_phase(Phase::Researching, Event::Fatal, 2, 3), Some(Phase::Errored));
        assert_eq!(next_phase(Phase::Scoping, Event::Fatal, 0, 3), Some(Phase::Errored));
        assert_eq!(next_phase(Phase::Accepted, Event::Fatal, 0, 3), None);
        assert_eq!(next_phase(Phase::Scoping, Event::DraftReady, 0, 3), None);
        assert_eq!(next_phase(Phase::Exhausted, Event::GuidanceReady, 0, 3), None);
    }

    #[test]
    fn test_best_of_prefers_objectivity_then_recency() {
        let history = vec![
            entry(0, 0.7, Verdict::Refine),
            entry(1, 0.6, Verdict::Refine),
            entry(2, 0.7, Verdict::Refine),
        ];
        assert_eq!(best_of(&history).unwrap().draft.iteration, 2);
        assert!(best_of(&[]).is_none());
    }

    #[test]
    fn test_best_of_prefers_accepted_draft() {
        let history = vec![entry(0, 0.9, Verdict::Refine), entry(1, 0.8, Verdict::Accept)];
        assert_eq!(best_of(&history).unwrap().draft.iteration, 1);
    }

    #[test]
    fn test_state_marks_terminal_once() {
        let mut state = RefinementState::new(Phase::Evaluating);
        assert!(!state.terminal);
        state.advance(Event::Evaluated(Verdict::Accept), 3).unwrap();
        assert!(state.terminal);

        let err = state.advance(Event::Fatal, 3).unwrap_err();
        assert!(matches!(err.cause, FatalCause::IllegalTransition { .. }));
        assert_eq!(err.stage, Stage::Finished);
        assert_eq!(state.phase, Phase::Accepted);
    }
}
