// src/engine/chain.rs

//! Pure JobChain state machine.
//!
//! A `JobChain` walks one package through the workflow graph. It performs
//! no IO: the caller hands it the graph and the package record, applies the
//! returned [`ChainStep`], and persists the package afterwards. Decision
//! links are resolved inline; task links yield a job and block the chain
//! until [`JobChain::complete_job`] is called with the job's outcome.

use uuid::Uuid;

use crate::errors::{EngineError, Result, WorkflowFault};
use crate::store::{JobRecord, Package};
use crate::types::{PackageStatus, Terminal};
use crate::workflow::{ExitTarget, JobOutcome, LinkId, LinkKind, WorkflowGraph};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    Ready,
    AwaitingJob(Uuid),
    AwaitingDecision,
    Finished(PackageStatus),
}

/// What the shell should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStep {
    /// Persist and dispatch this job.
    RunJob(JobRecord),
    /// Park the package at a manual choice.
    AwaitDecision { link: LinkId, choices: Vec<LinkId> },
    /// The package reached a terminal status.
    Finished(PackageStatus),
    /// The graph could not route; the package is now `failed`.
    Fault(WorkflowFault),
}

/// Result of feeding a job outcome back into the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Moved(LinkId),
    Finished(PackageStatus),
    Fault(WorkflowFault),
}

#[derive(Debug, Clone)]
pub struct JobChain {
    package: Uuid,
    cursor: LinkId,
    state: ChainState,
}

impl JobChain {
    pub fn new(package: Uuid, start: impl Into<LinkId>) -> Self {
        Self {
            package,
            cursor: start.into(),
            state: ChainState::Ready,
        }
    }

    pub fn package(&self) -> Uuid {
        self.package
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Advance to the next stable point.
    ///
    /// Not re-entrant: calling it while a job is pending or a decision is
    /// awaited is an error.
    pub fn next(&mut self, graph: &WorkflowGraph, package: &mut Package) -> Result<ChainStep> {
        match &self.state {
            ChainState::Ready => {}
            ChainState::Finished(status) => return Ok(ChainStep::Finished(*status)),
            ChainState::AwaitingJob(job) => {
                return Err(EngineError::InvalidState(format!(
                    "chain for package {} is waiting on job {job}",
                    self.package
                )))
            }
            ChainState::AwaitingDecision => {
                return Err(EngineError::InvalidState(format!(
                    "chain for package {} is waiting on a decision at '{}'",
                    self.package, self.cursor
                )))
            }
        }

        if package.status.is_terminal() {
            self.state = ChainState::Finished(package.status);
            return Ok(ChainStep::Finished(package.status));
        }

        // Each decision hop moves the cursor; more hops than links means a loop.
        let mut hops = 0usize;
        loop {
            let Some(link) = graph.get(&self.cursor) else {
                let fault = WorkflowFault {
                    link: self.cursor.clone(),
                    outcome: "cursor".to_string(),
                    reason: "link does not exist in the workflow".to_string(),
                };
                return Ok(ChainStep::Fault(self.fault(package, fault)));
            };
            package.current_link = Some(self.cursor.clone());

            let target = match &link.kind {
                LinkKind::Task(_) => {
                    let job = JobRecord::new(package.uuid, link.id.clone());
                    self.state = ChainState::AwaitingJob(job.id);
                    return Ok(ChainStep::RunJob(job));
                }
                LinkKind::Choice { choices } => {
                    self.state = ChainState::AwaitingDecision;
                    return Ok(ChainStep::AwaitDecision {
                        link: link.id.clone(),
                        choices: choices.clone(),
                    });
                }
                LinkKind::SetVariable { variable, value } => {
                    package.variables.insert(variable.clone(), value.clone());
                    link.exit_codes.default_entry().map(|e| e.target.clone())
                }
                LinkKind::LinkPull { variable } => package
                    .variables
                    .get(variable)
                    .filter(|v| graph.contains(v))
                    .map(|v| ExitTarget::Link(v.clone()))
                    .or_else(|| link.exit_codes.default_entry().map(|e| e.target.clone())),
            };

            match target {
                Some(ExitTarget::Link(next)) => {
                    hops += 1;
                    if hops > graph.len() {
                        let fault = WorkflowFault {
                            link: self.cursor.clone(),
                            outcome: "decision".to_string(),
                            reason: "decision links loop without reaching a task".to_string(),
                        };
                        return Ok(ChainStep::Fault(self.fault(package, fault)));
                    }
                    self.cursor = next;
                }
                Some(ExitTarget::Terminal(t)) => {
                    return Ok(ChainStep::Finished(self.finish(package, t)));
                }
                None => {
                    let fault = WorkflowFault {
                        link: self.cursor.clone(),
                        outcome: "decision".to_string(),
                        reason: "decision link has no default exit".to_string(),
                    };
                    return Ok(ChainStep::Fault(self.fault(package, fault)));
                }
            }
        }
    }

    /// Route the outcome of the pending job through the link's exit map.
    pub fn complete_job(
        &mut self,
        graph: &WorkflowGraph,
        package: &mut Package,
        job: Uuid,
        outcome: &JobOutcome,
    ) -> Result<Transition> {
        match &self.state {
            ChainState::AwaitingJob(pending) if *pending == job => {}
            other => {
                return Err(EngineError::InvalidState(format!(
                    "job {job} completed but chain for package {} is {other:?}",
                    self.package
                )))
            }
        }

        let Some(link) = graph.get(&self.cursor) else {
            let fault = WorkflowFault {
                link: self.cursor.clone(),
                outcome: outcome.to_string(),
                reason: "link does not exist in the workflow".to_string(),
            };
            return Ok(Transition::Fault(self.fault(package, fault)));
        };

        let Some(entry) = link.exit_codes.lookup(outcome) else {
            let reason = match outcome {
                JobOutcome::Code(_) => "no exit entry for this code and no default",
                JobOutcome::Indeterminate(_) => "no `indeterminate` exit entry",
            };
            let fault = WorkflowFault {
                link: link.id.clone(),
                outcome: outcome.to_string(),
                reason: reason.to_string(),
            };
            return Ok(Transition::Fault(self.fault(package, fault)));
        };

        match &entry.target {
            ExitTarget::Terminal(t) => Ok(Transition::Finished(self.finish(package, *t))),
            ExitTarget::Link(next) if graph.contains(next) => {
                self.cursor = next.clone();
                package.current_link = Some(next.clone());
                self.state = ChainState::Ready;
                Ok(Transition::Moved(next.clone()))
            }
            ExitTarget::Link(next) => {
                let fault = WorkflowFault {
                    link: link.id.clone(),
                    outcome: outcome.to_string(),
                    reason: format!("exit target '{next}' does not exist"),
                };
                Ok(Transition::Fault(self.fault(package, fault)))
            }
        }
    }

    /// Apply a manual decision at a parked choice link.
    pub fn resume(&mut self, graph: &WorkflowGraph, package: &mut Package, choice: &str) -> Result<()> {
        if self.state != ChainState::AwaitingDecision {
            return Err(EngineError::InvalidDecision(format!(
                "package {} is not awaiting a decision",
                self.package
            )));
        }
        let allowed = match graph.get(&self.cursor).map(|l| &l.kind) {
            Some(LinkKind::Choice { choices }) => choices.iter().any(|c| c == choice),
            _ => false,
        };
        if !allowed || !graph.contains(choice) {
            return Err(EngineError::InvalidDecision(format!(
                "'{choice}' is not an allowed choice at '{}'",
                self.cursor
            )));
        }
        self.cursor = choice.to_string();
        package.current_link = Some(self.cursor.clone());
        self.state = ChainState::Ready;
        Ok(())
    }

    fn finish(&mut self, package: &mut Package, terminal: Terminal) -> PackageStatus {
        let status = PackageStatus::from(terminal);
        package.status = status;
        self.state = ChainState::Finished(status);
        status
    }

    fn fault(&mut self, package: &mut Package, fault: WorkflowFault) -> WorkflowFault {
        package.status = PackageStatus::Failed;
        package.fault = Some(fault.clone());
        self.state = ChainState::Finished(PackageStatus::Failed);
        fault
    }
}
