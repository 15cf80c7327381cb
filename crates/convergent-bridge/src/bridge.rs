//! The coordination bridge — the one component that sees all others.
//!
//! Subsystems are constructor-injected capabilities: voting, stigmergy,
//! and signals can each be disabled independently and the rest of the
//! surface keeps working (no voting configured still leaves prompt
//! enrichment fully functional).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use convergent_consensus::{DecisionStore, Triumvirate, VoteStats};
use convergent_core::protocol::{
    AgentIdentity, Decision, Intent, MarkerType, QuorumLevel, Signal, StigmergyMarker, Vote,
    VoteChoice,
};
use convergent_core::{ConvergentError, ConvergentResult, CoordinationConfig, SignalBackendKind};
use convergent_governor::{GateScope, GovernorOutcome, GovernorReport, MergeGovernor};
use convergent_graph::{IntentGraph, MemoryBackend, ResolutionOutcome, SqliteBackend};
use convergent_scoring::{PhiScorer, ScoreStore, TaskOutcome};
use convergent_swarm::{
    FilesystemSignalBackend, FlockingCoordinator, MemorySignalBackend, SignalBus, StigmergyField,
    SqliteSignalBackend, Sweeper,
};

use crate::events::{EventLog, EventType};
use crate::health::{CoordinationHealth, HealthChecker};

/// Single entry point for an orchestrator to use the coordination engine.
pub struct CoordinationBridge {
    config: CoordinationConfig,
    graph: IntentGraph,
    scores: Arc<ScoreStore>,
    scorer: Arc<PhiScorer>,
    decisions: Option<Arc<DecisionStore>>,
    triumvirate: Option<Triumvirate>,
    stigmergy: Option<Arc<StigmergyField>>,
    signals: Option<Arc<SignalBus>>,
    events: EventLog,
    governor: Mutex<MergeGovernor>,
}

impl CoordinationBridge {
    /// Wire every subsystem from the config. `db_path = ":memory:"` keeps
    /// all stores in memory (and forces the memory signal backend).
    pub fn new(config: &CoordinationConfig) -> ConvergentResult<Self> {
        let graph: IntentGraph = if config.in_memory() {
            IntentGraph::new(Box::new(MemoryBackend::new()), config)
        } else {
            IntentGraph::new(
                Box::new(SqliteBackend::open(&config.intent_db_path())?),
                config,
            )
        };

        let scores = Arc::new(ScoreStore::open(&config.coordination_db_path())?);
        let scorer = Arc::new(PhiScorer::new(Arc::clone(&scores), config));

        let decisions = Arc::new(DecisionStore::open(&config.coordination_db_path())?);
        let triumvirate = Triumvirate::new(Arc::clone(&decisions), Arc::clone(&scorer), config);

        let stigmergy = Arc::new(StigmergyField::open(&config.stigmergy_db_path(), config)?);

        let backend: Box<dyn convergent_swarm::SignalBackend> =
            match (config.in_memory(), config.signal_backend) {
                (true, _) | (false, SignalBackendKind::Memory) => {
                    Box::new(MemorySignalBackend::new())
                }
                (false, SignalBackendKind::Filesystem) => {
                    Box::new(FilesystemSignalBackend::open(&config.signal_dir())?)
                }
                (false, SignalBackendKind::Persistent) => {
                    Box::new(SqliteSignalBackend::open(&config.signal_db_path())?)
                }
            };
        let signals = Arc::new(SignalBus::new(backend, "bridge"));

        let events = EventLog::open(&config.coordination_db_path())?;

        Ok(Self {
            config: config.clone(),
            graph,
            scores,
            scorer,
            decisions: Some(decisions),
            triumvirate: Some(triumvirate),
            stigmergy: Some(stigmergy),
            signals: Some(signals),
            events,
            governor: Mutex::new(MergeGovernor::new(config)),
        })
    }

    /// Install a semantic matcher hook on the intent graph.
    pub fn with_semantic_matcher(
        mut self,
        matcher: Arc<dyn convergent_core::matching::SemanticMatcher>,
    ) -> Self {
        self.graph.set_semantic_matcher(matcher);
        self
    }

    /// Drop the voting capability. Requests and votes error; everything
    /// else keeps working.
    pub fn without_voting(mut self) -> Self {
        self.triumvirate = None;
        self.decisions = None;
        self
    }

    /// Drop the stigmergy field (and with it the flocking checks).
    pub fn without_stigmergy(mut self) -> Self {
        self.stigmergy = None;
        self
    }

    /// Drop the signal bus.
    pub fn without_signals(mut self) -> Self {
        self.signals = None;
        self
    }

    pub fn graph(&self) -> &IntentGraph {
        &self.graph
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn signal_bus(&self) -> Option<&SignalBus> {
        self.signals.as_deref()
    }

    pub fn stigmergy(&self) -> Option<&StigmergyField> {
        self.stigmergy.as_deref()
    }

    // ------------------------------------------------------------------
    // Intent graph
    // ------------------------------------------------------------------

    /// Publish an intent into the shared graph. Returns its stability.
    #[instrument(skip(self, intent), fields(intent_id = %intent.intent_id))]
    pub fn publish_intent(&self, intent: &Intent) -> ConvergentResult<f64> {
        let stability = self.graph.publish(intent)?;
        self.record_event(
            EventType::IntentPublished,
            &intent.agent_id,
            serde_json::json!({"intent_id": intent.intent_id, "stability": stability}),
            Some(&intent.intent_id),
        );
        Ok(stability)
    }

    /// Resolve an intent against the graph: overlaps, conflicts,
    /// adjustments, adopted constraints.
    pub fn resolve_intent(&self, intent: &Intent) -> ConvergentResult<ResolutionOutcome> {
        let outcome = self.graph.resolve(intent)?;
        self.record_event(
            EventType::IntentResolved,
            &intent.agent_id,
            serde_json::json!({
                "intent_id": intent.intent_id,
                "conflicts": outcome.conflicts.len(),
                "adjustments": outcome.adjustments.len(),
            }),
            Some(&intent.intent_id),
        );
        for conflict in &outcome.conflicts {
            self.record_event(
                EventType::ConflictDetected,
                &intent.agent_id,
                serde_json::json!({
                    "mine": conflict.mine,
                    "theirs": conflict.theirs,
                    "class": conflict.class.as_str(),
                }),
                Some(&intent.intent_id),
            );
        }
        Ok(outcome)
    }

    /// Run a proposed intent through the three-layer governor.
    pub fn evaluate_intent(
        &self,
        intent: &Intent,
        scope: &GateScope,
    ) -> ConvergentResult<GovernorReport> {
        let mut governor = self
            .governor
            .lock()
            .map_err(|e| ConvergentError::backend(format!("governor lock poisoned: {e}")))?;
        let report = governor.evaluate(intent, &self.graph, scope)?;
        if report.outcome == GovernorOutcome::Escalate {
            self.record_event(
                EventType::EscalationTriggered,
                &intent.agent_id,
                serde_json::json!({"intent_id": intent.intent_id}),
                Some(&intent.intent_id),
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Prompt enrichment
    // ------------------------------------------------------------------

    /// Build the context block to inject into an agent's prompt:
    /// stigmergy context, flocking constraints, and the agent's trust
    /// scores. Empty string when nothing is relevant.
    pub fn enrich_prompt(
        &self,
        agent_id: &str,
        task_description: &str,
        file_paths: &[String],
        current_work: &str,
    ) -> ConvergentResult<String> {
        let mut sections: Vec<String> = Vec::new();

        if let Some(field) = self.stigmergy.as_deref() {
            let context = field.context_for(file_paths)?;
            if !context.is_empty() {
                sections.push(context);
            }

            let flocking = FlockingCoordinator::new(field);
            let work = if current_work.is_empty() {
                task_description
            } else {
                current_work
            };
            let constraints =
                flocking.generate_constraints(agent_id, task_description, work, file_paths)?;
            if !constraints.is_empty() {
                sections.push(constraints);
            }
        }

        let scores = self.scorer.all_scores(agent_id)?;
        if !scores.is_empty() {
            let mut lines = vec!["## Your trust scores".to_string(), String::new()];
            for (domain, score) in scores {
                lines.push(format!("- {domain}: {score:.2}"));
            }
            sections.push(lines.join("\n"));
        }

        Ok(sections.join("\n\n"))
    }

    // ------------------------------------------------------------------
    // Consensus
    // ------------------------------------------------------------------

    /// Create a consensus request. Returns its id.
    pub fn request_consensus(
        &self,
        task_id: &str,
        question: &str,
        context: &str,
        quorum: Option<QuorumLevel>,
        artifacts: Vec<String>,
    ) -> ConvergentResult<String> {
        let triumvirate = self.voting()?;
        let request = triumvirate.create_request(task_id, question, context, quorum, artifacts)?;
        Ok(request.request_id)
    }

    /// Submit a vote from an agent. Vote weight is computed server-side
    /// at evaluation time, never from the submitted identity.
    pub fn submit_agent_vote(
        &self,
        request_id: &str,
        agent_id: &str,
        role: &str,
        model: &str,
        choice: VoteChoice,
        confidence: f64,
        reasoning: &str,
    ) -> ConvergentResult<()> {
        let triumvirate = self.voting()?;
        let mut agent = AgentIdentity::new(agent_id, role, model);
        agent.phi_score = self.scorer.score(agent_id, role)?;
        let vote = Vote::new(request_id, agent, choice, confidence, reasoning);
        triumvirate.submit_vote(vote)?;
        self.record_event(
            EventType::VoteCast,
            agent_id,
            serde_json::json!({"request_id": request_id, "choice": choice}),
            Some(request_id),
        );
        Ok(())
    }

    /// Evaluate a consensus request: the final decision once one exists,
    /// `None` while the window is still open with nothing decisive.
    pub fn evaluate(&self, request_id: &str) -> ConvergentResult<Option<Decision>> {
        let triumvirate = self.voting()?;
        let already_decided = triumvirate.decision(request_id)?.is_some();
        let decision = triumvirate.evaluate(request_id)?;
        if let (false, Some(decision)) = (already_decided, &decision) {
            self.record_event(
                EventType::DecisionMade,
                "triumvirate",
                serde_json::json!({
                    "request_id": request_id,
                    "outcome": decision.outcome,
                }),
                Some(request_id),
            );
        }
        Ok(decision)
    }

    /// Record a human confirmation for an `unanimous_human` request.
    pub fn confirm_human(&self, request_id: &str, confirmed_by: &str) -> ConvergentResult<()> {
        self.voting()?.confirm_human(request_id, confirmed_by)
    }

    /// All decisions for a task, newest first.
    pub fn vote_history(&self, task_id: &str) -> ConvergentResult<Vec<Decision>> {
        self.voting()?.vote_history(task_id)
    }

    /// Persisted decision history with optional filters.
    pub fn decision_history(
        &self,
        task_id: Option<&str>,
        outcome: Option<&str>,
        limit: u64,
    ) -> ConvergentResult<Vec<Decision>> {
        let decisions = self.decisions.as_ref().ok_or_else(voting_disabled)?;
        decisions.decision_history(task_id, outcome, limit)
    }

    /// Voting statistics for one agent.
    pub fn agent_vote_stats(&self, agent_id: &str) -> ConvergentResult<VoteStats> {
        let decisions = self.decisions.as_ref().ok_or_else(voting_disabled)?;
        decisions.agent_vote_stats(agent_id)
    }

    // ------------------------------------------------------------------
    // Outcomes, markers, signals
    // ------------------------------------------------------------------

    /// Record a completed task: update the agent's phi score, leave
    /// `file_modified` markers on the touched files, and broadcast a
    /// `task_outcome` signal. Returns the updated phi score.
    #[instrument(skip(self, file_paths))]
    pub fn record_task_outcome(
        &self,
        agent_id: &str,
        skill_domain: &str,
        outcome: TaskOutcome,
        file_paths: &[String],
    ) -> ConvergentResult<f64> {
        let phi = self
            .scorer
            .record_outcome(agent_id, skill_domain, outcome, Utc::now())?;
        self.record_event(
            EventType::ScoreUpdated,
            agent_id,
            serde_json::json!({"skill_domain": skill_domain, "outcome": outcome.as_str(), "phi": phi}),
            None,
        );

        if let Some(field) = self.stigmergy.as_deref() {
            for path in file_paths {
                let marker = field.leave_marker(
                    agent_id,
                    MarkerType::FileModified,
                    path,
                    &format!("{} by {agent_id} in {skill_domain}", outcome.as_str()),
                )?;
                self.record_event(
                    EventType::MarkerLeft,
                    agent_id,
                    serde_json::json!({"marker_id": marker.marker_id, "target": path}),
                    None,
                );
            }
        }

        if let Some(bus) = self.signals.as_deref() {
            let payload = serde_json::json!({
                "skill_domain": skill_domain,
                "outcome": outcome.as_str(),
            });
            bus.publish(&Signal::broadcast(
                "task_outcome",
                agent_id,
                &payload.to_string(),
            ))?;
            self.record_event(
                EventType::SignalSent,
                agent_id,
                serde_json::json!({"signal_type": "task_outcome"}),
                None,
            );
        }

        info!(agent_id, skill_domain, phi, "task outcome recorded");
        Ok(phi)
    }

    /// The agent's current phi score for a domain (the prior when unseen).
    pub fn agent_score(&self, agent_id: &str, skill_domain: &str) -> ConvergentResult<f64> {
        self.scorer.score(agent_id, skill_domain)
    }

    /// Leave a stigmergy marker directly.
    pub fn leave_marker(
        &self,
        agent_id: &str,
        marker_type: MarkerType,
        target: &str,
        content: &str,
    ) -> ConvergentResult<StigmergyMarker> {
        let field = self.stigmergy.as_deref().ok_or_else(|| {
            ConvergentError::validation("stigmergy is disabled on this bridge")
        })?;
        let marker = field.leave_marker(agent_id, marker_type, target, content)?;
        self.record_event(
            EventType::MarkerLeft,
            agent_id,
            serde_json::json!({"marker_id": marker.marker_id, "target": target}),
            None,
        );
        Ok(marker)
    }

    /// Run one evaporation sweep. Returns the purge count.
    pub fn evaporate_markers(&self) -> ConvergentResult<usize> {
        let Some(field) = self.stigmergy.as_deref() else {
            return Ok(0);
        };
        let purged = field.evaporate()?;
        if purged > 0 {
            self.record_event(
                EventType::MarkerEvaporated,
                "sweeper",
                serde_json::json!({"purged": purged}),
                None,
            );
        }
        Ok(purged)
    }

    /// Start the background sweeps: marker evaporation, signal polling,
    /// and expired-signal cleanup. Callers hold the sweepers and stop
    /// them (or drop them) to terminate the workers. In tests, skip this
    /// and drive `evaporate_markers` / `poll_once` directly.
    pub fn start_sweepers(&self, interval: Duration) -> Vec<Sweeper> {
        let mut sweepers = Vec::new();

        if let Some(field) = self.stigmergy.as_ref() {
            let field = Arc::clone(field);
            sweepers.push(Sweeper::start("evaporation", interval, move || {
                if let Err(e) = field.evaporate() {
                    tracing::warn!(error = %e, "evaporation sweep failed");
                }
            }));
        }

        if let Some(bus) = self.signals.as_ref() {
            let poll_bus = Arc::clone(bus);
            sweepers.push(Sweeper::start("signal-poll", interval, move || {
                if let Err(e) = poll_bus.poll_once() {
                    tracing::warn!(error = %e, "signal poll failed");
                }
            }));

            let sweep_bus = Arc::clone(bus);
            sweepers.push(Sweeper::start("signal-expiry", interval, move || {
                if let Err(e) = sweep_bus.sweep_expired(3600) {
                    tracing::warn!(error = %e, "signal expiry sweep failed");
                }
            }));
        }

        sweepers
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// The aggregated health report across all wired subsystems.
    pub fn health(&self) -> ConvergentResult<CoordinationHealth> {
        let mut checker = HealthChecker::new()
            .with_graph(&self.graph)
            .with_scores(&self.scores);
        if let Some(field) = self.stigmergy.as_deref() {
            checker = checker.with_stigmergy(field);
        }
        if let Some(decisions) = self.decisions.as_deref() {
            checker = checker.with_decisions(decisions);
        }
        checker.check()
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    fn voting(&self) -> ConvergentResult<&Triumvirate> {
        self.triumvirate.as_ref().ok_or_else(voting_disabled)
    }

    fn record_event(
        &self,
        event_type: EventType,
        agent_id: &str,
        payload: serde_json::Value,
        correlation_id: Option<&str>,
    ) {
        if let Err(e) = self
            .events
            .record(event_type, agent_id, payload, correlation_id)
        {
            tracing::warn!(error = %e, "failed to record coordination event");
        }
    }
}

fn voting_disabled() -> ConvergentError {
    ConvergentError::validation("voting is disabled on this bridge")
}
