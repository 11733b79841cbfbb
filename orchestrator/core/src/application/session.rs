// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Orchestrator
//!
//! Drives one agent + container pairing through a project's feature graph
//! and, once the features are done, through QA and manager review.
//!
//! Each iteration:
//!
//! 1. stop on cancellation, the iteration cap, `PROJECT_SIGNED_OFF` or a `BLOCKER`
//! 2. `QA_PASSED` / `TRIGGER_MANAGER` runs a manager review; `COMPLETED` /
//!    `TRIGGER_QA` runs a QA pass
//! 3. otherwise rebuild the task graph from the stored FeatureList
//! 4. pick the first Ready feature (or an `in_progress` one whose claim lease
//!    has lapsed) whose write paths, plus a claim on the feature itself, can
//!    all be leased; features another agent holds are skipped this round
//! 5. ask the agent for commands and run them in the container
//! 6. record the outcome on the feature and release the leases
//!
//! Agent and command failures count against the feature's retry budget and
//! the loop moves on. Losing the container or the store ends the session,
//! and a feature interrupted that way goes back to `pending`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the session orchestration loop

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::feature_service::{FeatureError, FeatureService};
use crate::application::lock_manager::{LeaseLockManager, LockError};
use crate::application::review::{self, QaReport, QA_PASS};
use crate::application::signal_channel::{SignalChannel, SignalError};
use crate::domain::agent::AgentClient;
use crate::domain::clock::Clock;
use crate::domain::config::{CoordinationConfig, SessionConfig};
use crate::domain::feature::{Feature, FeatureList, FeatureStatus};
use crate::domain::repository::{ObservationRepository, RepositoryError};
use crate::domain::runtime::{ContainerId, ContainerRunner, ContainerSpec, RuntimeError};
use crate::domain::session::{SessionManager, SessionObserver, SessionState, SessionStatus, SessionStoreError};
use crate::domain::signal::{COMPLETED, PROJECT_SIGNED_OFF, QA_PASSED, TRIGGER_MANAGER, TRIGGER_QA, TRUE_VALUE};
use crate::domain::task_graph::{GraphError, TaskGraph, TaskNode, TaskStatus};

const QA_ATTRIBUTION: &str = "qa-agent";
const MANAGER_ATTRIBUTION: &str = "manager-agent";

/// Lock path claiming a feature for the duration of one iteration.
pub fn claim_path(feature_id: &str) -> String {
    format!("feature://{}", feature_id)
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cancelled")]
    Cancelled,

    #[error("session '{0}' has not been started")]
    NotStarted(String),

    #[error("container runtime failure: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("store failure: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("invalid task graph: {0}")]
    Graph(#[from] GraphError),

    #[error("session state: {0}")]
    SessionStore(#[from] SessionStoreError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Lock(LockError),
}

impl From<LockError> for SessionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Cancelled => SessionError::Cancelled,
            other => SessionError::Lock(other),
        }
    }
}

/// Why `run_loop` returned normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// `PROJECT_SIGNED_OFF` was raised.
    Completed,
    MaxIterationsReached,
    /// The project has no feature list, or an empty one.
    NoWork,
    Blocked(String),
    /// Work remains but nothing can become Ready, even after a manager review.
    Stalled(Vec<String>),
}

/// Collaborators shared by every session in a process.
#[derive(Clone)]
pub struct SessionDeps {
    pub agent: Arc<dyn AgentClient>,
    pub runner: Arc<dyn ContainerRunner>,
    pub sessions: Arc<dyn SessionManager>,
    pub features: FeatureService,
    pub signals: SignalChannel,
    pub locks: LeaseLockManager,
    pub observations: Arc<dyn ObservationRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct SessionOrchestrator {
    project_id: String,
    agent_id: String,
    config: SessionConfig,
    acquire_timeout: Duration,
    deps: SessionDeps,
    observer: Option<Arc<dyn SessionObserver>>,
    container: Option<ContainerId>,
    state: SessionState,
    retries: HashMap<String, u32>,
    feedback: HashMap<String, String>,
    iteration: u32,
    escalated: bool,
    stall_reviewed: bool,
}

impl SessionOrchestrator {
    pub fn new(name: impl Into<String>, config: &CoordinationConfig, deps: SessionDeps) -> Self {
        let name = name.into();
        let now = deps.clock.now();
        let mut state = SessionState::new(name.clone(), config.session.workspace.clone(), now);
        state.goal = format!("Implement features of project '{}'", config.project_id);

        Self {
            project_id: config.project_id.clone(),
            agent_id: name,
            config: config.session.clone(),
            acquire_timeout: config.locks.acquire_timeout,
            deps,
            observer: None,
            container: None,
            state,
            retries: HashMap::new(),
            feedback: HashMap::new(),
            iteration: 0,
            escalated: false,
            stall_reviewed: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Lock owner identity. Defaults to the session name.
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Pull, create and start the session container. Calling again once a
    /// container exists does nothing.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if self.container.is_some() {
            return Ok(());
        }

        match self.provision(cancel).await {
            Ok(id) => {
                self.state.container_id = Some(id.as_str().to_string());
                self.state.status = SessionStatus::Running;
                self.container = Some(id);
                self.deps.sessions.save(&self.state).await?;
                info!(session = %self.state.name, project_id = %self.project_id, "Session started");
                Ok(())
            }
            Err(e) => {
                let status = match e {
                    SessionError::Cancelled => SessionStatus::Cancelled,
                    _ => SessionStatus::Failed,
                };
                self.state.finish(status, Some(e.to_string()), self.deps.clock.now());
                self.persist_state().await;
                Err(e)
            }
        }
    }

    async fn provision(&self, cancel: &CancellationToken) -> Result<ContainerId, SessionError> {
        let runner = &self.deps.runner;
        tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            pulled = runner.pull_image(&self.config.image) => pulled?,
        }

        let mut spec = ContainerSpec::new(
            format!("recac-{}", self.state.name),
            self.config.image.clone(),
            self.config.workspace.clone(),
        );
        spec.env.insert("RECAC_PROJECT_ID".to_string(), self.project_id.clone());

        let id = runner.create(&spec).await?;
        if let Err(e) = runner.start(&id).await {
            if let Err(cleanup) = runner.remove(&id).await {
                warn!(container = %id.as_str(), error = %cleanup, "Failed to remove container after start failure");
            }
            return Err(e.into());
        }
        Ok(id)
    }

    /// Iterate until a stop condition. Locks held by this session are always
    /// released and the final state persisted before returning.
    pub async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<SessionOutcome, SessionError> {
        if self.container.is_none() {
            return Err(SessionError::NotStarted(self.state.name.clone()));
        }

        let result = self.drive(cancel).await;

        if let Err(e) = self.deps.locks.release_all(&self.project_id, &self.agent_id).await {
            warn!(agent_id = %self.agent_id, error = %e, "Failed to release locks on session exit");
        }

        let (status, error) = match &result {
            Ok(SessionOutcome::Completed | SessionOutcome::MaxIterationsReached | SessionOutcome::NoWork) => {
                (SessionStatus::Completed, None)
            }
            Ok(SessionOutcome::Blocked(reason)) => (SessionStatus::Failed, Some(format!("blocked: {}", reason))),
            Ok(SessionOutcome::Stalled(ids)) => {
                (SessionStatus::Failed, Some(format!("stalled on: {}", ids.join(", "))))
            }
            Err(SessionError::Cancelled) => (SessionStatus::Cancelled, None),
            Err(e) => (SessionStatus::Failed, Some(e.to_string())),
        };
        self.state.finish(status, error, self.deps.clock.now());
        self.persist_state().await;

        match &result {
            Ok(outcome) => info!(session = %self.state.name, iterations = self.iteration, ?outcome, "Session finished"),
            Err(e) => warn!(session = %self.state.name, iterations = self.iteration, error = %e, "Session ended with error"),
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<SessionOutcome, SessionError> {
        loop {
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if self.iteration >= self.config.max_iterations {
                return Ok(SessionOutcome::MaxIterationsReached);
            }

            let project_id = self.project_id.clone();
            let signals = self.deps.signals.clone();
            if signals.is_set(&project_id, PROJECT_SIGNED_OFF).await? {
                return Ok(SessionOutcome::Completed);
            }
            if let Some(reason) = signals.blocker(&project_id).await? {
                return Ok(SessionOutcome::Blocked(reason));
            }

            if signals.is_set(&project_id, QA_PASSED).await? || signals.is_set(&project_id, TRIGGER_MANAGER).await? {
                self.begin_iteration();
                self.run_manager_review(cancel).await?;
                continue;
            }
            if signals.is_set(&project_id, COMPLETED).await? || signals.is_set(&project_id, TRIGGER_QA).await? {
                if self.config.skip_qa {
                    info!(project_id = %project_id, "QA skipped; signing off");
                    signals.set_signal(&project_id, PROJECT_SIGNED_OFF, TRUE_VALUE).await?;
                    signals.delete_signal(&project_id, COMPLETED).await?;
                    signals.delete_signal(&project_id, TRIGGER_QA).await?;
                    continue;
                }
                self.begin_iteration();
                self.run_qa(cancel).await?;
                continue;
            }

            let list = match self.deps.features.load_feature_list(&project_id).await? {
                Some(list) if !list.features.is_empty() => list,
                _ => return Ok(SessionOutcome::NoWork),
            };
            let graph = TaskGraph::load_from_features(&list.features)?;

            if graph.all_done() {
                debug!(project_id = %project_id, "Every feature done; requesting QA");
                signals.request_qa(&project_id).await?;
                continue;
            }

            let summary = graph.summary();
            if summary.ready == 0 && summary.in_progress == 0 {
                let ids: Vec<String> = graph
                    .nodes()
                    .filter(|n| n.status != TaskStatus::Done)
                    .map(|n| n.id.clone())
                    .collect();
                warn!(project_id = %project_id, stuck = ?ids, "No feature can make progress");
                if self.stall_reviewed {
                    return Ok(SessionOutcome::Stalled(ids));
                }
                self.stall_reviewed = true;
                signals.request_manager_review(&project_id).await?;
                continue;
            }

            if summary.failed * 2 > summary.total && !self.escalated {
                warn!(project_id = %project_id, failed = summary.failed, total = summary.total, "Most features failed; requesting manager review");
                signals.request_manager_review(&project_id).await?;
                self.escalated = true;
                continue;
            }

            let candidates = self.candidates(&graph).await?;
            let Some((node, held)) = self.claim_first(&candidates, cancel).await? else {
                debug!(project_id = %project_id, iteration = self.iteration, "Nothing claimable; waiting");
                self.begin_iteration();
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                    _ = tokio::time::sleep(self.deps.locks.policy().poll_interval) => {}
                }
                continue;
            };

            self.begin_iteration();
            let outcome = match list.find(&node.id) {
                Some(feature) => self.work_feature(feature, &list, cancel).await,
                None => Ok(()),
            };
            self.deps.locks.release_paths(&project_id, &held, &self.agent_id).await;
            outcome?;
        }
    }

    fn begin_iteration(&mut self) {
        self.iteration += 1;
        metrics::counter!("recac_session_iterations_total").increment(1);
    }

    /// Ready nodes first, then `in_progress` nodes nobody holds a claim on:
    /// their session died or was cut off and the lease has lapsed.
    async fn candidates(&self, graph: &TaskGraph) -> Result<Vec<TaskNode>, SessionError> {
        let claimed: HashSet<String> = self
            .deps
            .locks
            .active_locks(&self.project_id)
            .await?
            .into_iter()
            .map(|lock| lock.path)
            .collect();

        let orphaned: Vec<&TaskNode> = graph
            .nodes()
            .filter(|n| n.status == TaskStatus::InProgress && !claimed.contains(&claim_path(&n.id)))
            .collect();
        for node in &orphaned {
            debug!(feature_id = %node.id, "in_progress feature has no live claim; reclaiming");
        }

        Ok(graph
            .ready_nodes()
            .into_iter()
            .chain(orphaned)
            .filter(|n| self.retries.get(&n.id).copied().unwrap_or(0) < self.config.max_task_retries)
            .cloned()
            .collect())
    }

    /// Lease the first candidate whose paths are all free.
    async fn claim_first(
        &self,
        candidates: &[TaskNode],
        cancel: &CancellationToken,
    ) -> Result<Option<(TaskNode, Vec<String>)>, SessionError> {
        for node in candidates {
            let mut paths = node.exclusive_write_paths.clone();
            paths.push(claim_path(&node.id));

            let held = self
                .deps
                .locks
                .acquire_all(&self.project_id, &paths, &self.agent_id, self.acquire_timeout, cancel)
                .await?;
            match held {
                Some(held) => return Ok(Some((node.clone(), held))),
                None => debug!(feature_id = %node.id, "Feature paths held by another agent; skipping"),
            }
        }
        Ok(None)
    }

    /// Mark the feature `in_progress`, attempt it, and put it back to
    /// `pending` if the attempt ends the session.
    async fn work_feature(
        &mut self,
        feature: &Feature,
        list: &FeatureList,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        info!(project_id = %self.project_id, feature_id = %feature.id, iteration = self.iteration, "Working feature");
        self.deps
            .features
            .update_feature_status(&self.project_id, &feature.id, &FeatureStatus::InProgress, false)
            .await?;
        if let Some(observer) = &self.observer {
            observer.on_iteration_start(self.iteration, &feature.id).await;
        }

        let result = self.attempt_feature(feature, list, cancel).await;
        if let Err(e) = &result {
            warn!(feature_id = %feature.id, error = %e, "Feature interrupted; returning it to pending");
            if let Err(reset) = self
                .deps
                .features
                .update_feature_status(&self.project_id, &feature.id, &FeatureStatus::Pending, false)
                .await
            {
                warn!(feature_id = %feature.id, error = %reset, "Failed to return feature to pending");
            }
        }
        result
    }

    async fn attempt_feature(
        &mut self,
        feature: &Feature,
        list: &FeatureList,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let project_id = self.project_id.clone();
        let attribution = format!("agent-{}", feature.id);

        let spec = self.deps.features.get_spec(&project_id).await?;
        let prompt = build_prompt(&spec, list, feature, self.feedback.get(&feature.id).map(String::as_str));

        let response = match self.ask_agent(&prompt, cancel).await? {
            Ok(text) => text,
            Err(reason) => {
                warn!(feature_id = %feature.id, error = %reason, "Agent call failed");
                return self.record_failure(&feature.id, reason).await;
            }
        };
        self.deps
            .observations
            .save_observation(&project_id, &attribution, &response, self.deps.clock.now())
            .await?;

        let commands = extract_bash_blocks(&response, self.config.max_commands);
        if commands.is_empty() {
            return self
                .record_failure(&feature.id, "agent response contained no bash commands".to_string())
                .await;
        }

        if let Some(reason) = self.run_commands(&commands, &attribution, cancel).await? {
            return self.record_failure(&feature.id, reason).await;
        }

        self.deps
            .features
            .update_feature_status(&project_id, &feature.id, &FeatureStatus::Done, true)
            .await?;
        self.retries.remove(&feature.id);
        self.feedback.remove(&feature.id);
        if let Some(observer) = &self.observer {
            observer.on_iteration_complete(self.iteration, &feature.id).await;
        }
        info!(project_id = %project_id, feature_id = %feature.id, "Feature done");
        Ok(())
    }

    /// Send a prompt, giving up on cancellation. The inner `Err` is an agent
    /// failure the caller may recover from.
    async fn ask_agent(&self, prompt: &str, cancel: &CancellationToken) -> Result<Result<String, String>, SessionError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            response = self.deps.agent.send(prompt) => response,
        };
        Ok(response.map_err(|e| format!("agent error: {}", e)))
    }

    /// Run commands in order, stopping at the first failure. Returns the
    /// failure description; only cancellation, store errors and fatal runtime
    /// errors surface as `Err`.
    async fn run_commands(
        &self,
        commands: &[String],
        attribution: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, SessionError> {
        let container = self
            .container
            .clone()
            .ok_or_else(|| SessionError::NotStarted(self.state.name.clone()))?;

        for command in commands {
            let argv = vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()];
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                result = self.deps.runner.exec(&container, &argv, self.config.exec_timeout) => result,
            };

            let exec = match result {
                Ok(exec) => exec,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => return Ok(Some(format!("`{}` failed: {}", command, e))),
            };

            let output = truncate_output(&exec.output, self.config.max_output_chars);
            if let Some(observer) = &self.observer {
                observer.on_command_output(self.iteration, command, exec.exit_code, &output).await;
            }
            self.deps
                .observations
                .save_observation(
                    &self.project_id,
                    attribution,
                    &format!("$ {}\n[exit {}]\n{}", command, exec.exit_code, output),
                    self.deps.clock.now(),
                )
                .await?;
            if !exec.succeeded() {
                return Ok(Some(format!("`{}` exited with {}:\n{}", command, exec.exit_code, output)));
            }
        }
        Ok(None)
    }

    /// Count a failed attempt. Out of retries marks the feature `failed`,
    /// otherwise it goes back to `pending`.
    async fn record_failure(&mut self, feature_id: &str, reason: String) -> Result<(), SessionError> {
        let attempts = {
            let count = self.retries.entry(feature_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let status = if attempts >= self.config.max_task_retries {
            warn!(feature_id, attempts, "Retry budget exhausted; marking feature failed");
            FeatureStatus::Failed
        } else {
            FeatureStatus::Pending
        };

        if let Some(observer) = &self.observer {
            observer.on_iteration_fail(self.iteration, feature_id, &reason).await;
        }
        self.feedback.insert(feature_id.to_string(), reason);
        self.deps
            .features
            .update_feature_status(&self.project_id, feature_id, &status, false)
            .await?;
        Ok(())
    }

    async fn current_report(&self) -> Result<QaReport, SessionError> {
        Ok(self
            .deps
            .features
            .load_feature_list(&self.project_id)
            .await?
            .map(|list| QaReport::from_features(&list))
            .unwrap_or_default())
    }

    /// QA pass: `QA_PASSED` on a `PASS` verdict, otherwise `COMPLETED` is
    /// withdrawn and the project goes back to coding.
    async fn run_qa(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let project_id = self.project_id.clone();
        info!(project_id = %project_id, iteration = self.iteration, "Running QA pass");

        let spec = self.deps.features.get_spec(&project_id).await?;
        let report = self.current_report().await?;
        let prompt = review::qa_prompt(&spec, &report);

        let verdict = match self.ask_agent(&prompt, cancel).await? {
            Err(reason) => Err(reason),
            Ok(response) => {
                self.deps
                    .observations
                    .save_observation(&project_id, QA_ATTRIBUTION, &response, self.deps.clock.now())
                    .await?;
                let commands = extract_bash_blocks(&response, self.config.max_commands);
                if let Some(reason) = self.run_commands(&commands, QA_ATTRIBUTION, cancel).await? {
                    warn!(project_id = %project_id, reason = %reason, "QA command failed");
                }
                match review::take_qa_result(&self.config.workspace).await {
                    Ok(Some(result)) if result == QA_PASS => Ok(()),
                    Ok(Some(result)) => Err(format!("QA verdict: {}", result)),
                    Ok(None) => Err(format!("QA wrote no {}", review::QA_RESULT_FILE)),
                    Err(e) => Err(format!("cannot read {}: {}", review::QA_RESULT_FILE, e)),
                }
            }
        };

        let signals = &self.deps.signals;
        signals.delete_signal(&project_id, TRIGGER_QA).await?;
        match verdict {
            Ok(()) => {
                signals.set_signal(&project_id, QA_PASSED, TRUE_VALUE).await?;
                info!(project_id = %project_id, "QA passed; manager review next");
            }
            Err(reason) => {
                signals.delete_signal(&project_id, COMPLETED).await?;
                warn!(project_id = %project_id, reason = %reason, "QA failed; returning to coding");
                self.deps
                    .observations
                    .save_observation(&project_id, QA_ATTRIBUTION, &reason, self.deps.clock.now())
                    .await?;
            }
        }
        Ok(())
    }

    /// Manager review: the agent may reopen features; sign-off requires every
    /// feature done and passing afterwards. Rejection withdraws `QA_PASSED`
    /// and `COMPLETED`.
    async fn run_manager_review(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let project_id = self.project_id.clone();
        info!(project_id = %project_id, iteration = self.iteration, "Running manager review");

        let report = self.current_report().await?;
        let prompt = review::manager_prompt(&report);

        let answered = match self.ask_agent(&prompt, cancel).await? {
            Err(reason) => {
                warn!(project_id = %project_id, error = %reason, "Manager agent failed");
                false
            }
            Ok(response) => {
                self.deps
                    .observations
                    .save_observation(&project_id, MANAGER_ATTRIBUTION, &response, self.deps.clock.now())
                    .await?;
                let commands = extract_bash_blocks(&response, self.config.max_commands);
                if let Some(reason) = self.run_commands(&commands, MANAGER_ATTRIBUTION, cancel).await? {
                    warn!(project_id = %project_id, reason = %reason, "Manager command failed");
                }
                true
            }
        };

        let after = self.current_report().await?;
        let signals = &self.deps.signals;
        signals.delete_signal(&project_id, TRIGGER_MANAGER).await?;
        if answered && after.all_passing() {
            signals.set_signal(&project_id, PROJECT_SIGNED_OFF, TRUE_VALUE).await?;
            info!(project_id = %project_id, "Manager approved; project signed off");
        } else {
            signals.delete_signal(&project_id, QA_PASSED).await?;
            signals.delete_signal(&project_id, COMPLETED).await?;
            warn!(project_id = %project_id, report = %after, "Manager did not sign off; returning to coding");
        }

        // Reopened features get a fresh retry budget.
        self.retries.clear();
        Ok(())
    }

    /// Stop and remove the container. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        let Some(id) = self.container.take() else {
            return Ok(());
        };
        if let Err(e) = self.deps.runner.stop(&id).await {
            warn!(container = %id.as_str(), error = %e, "Failed to stop container");
        }
        self.deps.runner.remove(&id).await?;
        Ok(())
    }

    async fn persist_state(&self) {
        if let Err(e) = self.deps.sessions.save(&self.state).await {
            warn!(session = %self.state.name, error = %e, "Failed to persist session state");
        }
    }
}

fn build_prompt(spec: &str, list: &FeatureList, feature: &Feature, previous_failure: Option<&str>) -> String {
    let mut prompt = String::new();
    if !list.project_name.is_empty() {
        prompt.push_str(&format!("Project: {}\n\n", list.project_name));
    }
    if !spec.is_empty() {
        prompt.push_str("## Specification\n");
        prompt.push_str(spec);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("## Feature {}\n{}\n", feature.id, feature.description));
    for (i, step) in feature.steps.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, step));
    }
    if !feature.dependencies.exclusive_write_paths.is_empty() {
        prompt.push_str(&format!(
            "\nYou may modify: {}\n",
            feature.dependencies.exclusive_write_paths.join(", ")
        ));
    }
    if !feature.dependencies.read_only_paths.is_empty() {
        prompt.push_str(&format!("Read only: {}\n", feature.dependencies.read_only_paths.join(", ")));
    }
    if let Some(failure) = previous_failure {
        prompt.push_str(&format!("\n## Previous attempt failed\n{}\n", failure));
    }
    prompt.push_str(
        "\nReply with the shell commands to run in the workspace, each in a ```bash fenced block. \
         The feature passes when every command exits 0.\n",
    );
    prompt
}

/// Contents of fenced ```bash blocks, in order, at most `max` of them.
/// Blocks whose body looks like JSON are skipped.
pub fn extract_bash_blocks(text: &str, max: usize) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        match current.as_mut() {
            None => {
                if let Some(lang) = trimmed.strip_prefix("```") {
                    if lang.trim().eq_ignore_ascii_case("bash") {
                        current = Some(Vec::new());
                    }
                }
            }
            Some(body) => {
                if trimmed == "```" {
                    let block = body.join("\n");
                    current = None;
                    let head = block.trim_start();
                    if block.trim().is_empty() || head.starts_with('{') || head.starts_with('[') {
                        continue;
                    }
                    blocks.push(block);
                    if blocks.len() >= max {
                        break;
                    }
                } else {
                    body.push(line);
                }
            }
        }
    }
    blocks
}

/// Cap `output` at `max_chars` characters.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n...[truncated]", &output[..cut]),
        None => output.to_string(),
    }
}
