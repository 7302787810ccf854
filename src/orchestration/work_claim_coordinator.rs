//! # Work Claim Coordinator
//!
//! Race-free assignment of (bundle, step) work units to operators.
//!
//! ## Protocol
//!
//! Every mutation follows the same shape: read a bundle snapshot, compute the
//! new bundle with the step state machine, then commit the difference
//! conditional on the versions that were read. Listings are advisory; a claim
//! always re-validates against a fresh read and commits as a compare-and-swap on
//! the step's version, so of N concurrent claimants exactly one commits and the
//! rest get [`FlowError::ClaimConflict`].
//!
//! A completion commits the completed step, its unlocked dependents and a
//! version guard on every other step of the bundle in one changeset. Two
//! siblings completing at once therefore serialize: the loser re-reads, sees the
//! winner's completion, and performs the unlock the winner could not.
//!
//! ## Retries
//!
//! - transient store failures back off per [`RetryPolicy`]; a retried claim
//!   first checks whether an earlier attempt already committed under the same
//!   [`ClaimKey`] and, if so, returns that assignment. Retried releases and
//!   completions likewise recognize their own landed write and report it,
//!   events included
//! - a lost claim race is final
//! - completion, release and price overrides re-read after a version conflict,
//!   up to `claim.max_conflict_retries` times
//!
//! Events are published only after their commit succeeded.

use crate::config::ClaimConfig;
use crate::error::{FlowError, Result};
use crate::events::{EventPublisher, FlowEvent, PublishedEvent};
use crate::logging::{log_claim_operation, log_error};
use crate::models::{Bundle, BundleId, ClaimKey, OperatorInfo, StepState, WorkAssignment, WorkUnit};
use crate::orchestration::dependency_resolver::StepDependencyResolver;
use crate::orchestration::retry::RetryPolicy;
use crate::state_machine::{StepEvent, StepStateMachine, StepStatus};
use crate::store::{Changeset, CommitOutcome, WorkStore};
use crate::validation::validate_price;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Result of a piece-count report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub bundle_id: BundleId,
    pub step_number: u32,
    pub completed_pieces: u32,
    pub step_completed: bool,
    /// Steps this completion moved from waiting to ready
    pub unlocked_steps: Vec<u32>,
    pub bundle_completed: bool,
    /// The report repeated what was already recorded; nothing was written
    pub unchanged: bool,
}

impl CompletionOutcome {
    fn unchanged(bundle: &Bundle, step: &StepState) -> Self {
        Self {
            bundle_id: bundle.bundle_id.clone(),
            step_number: step.step_number(),
            completed_pieces: step.completed_pieces,
            step_completed: step.status == StepStatus::Completed,
            unlocked_steps: Vec::new(),
            bundle_completed: bundle.is_complete(),
            unchanged: true,
        }
    }

    /// The completed state as this call's own write left it; dependents that
    /// have left waiting are reported as unlocked
    fn resumed(bundle: &Bundle, step: &StepState) -> Self {
        let step_number = step.step_number();
        let unlocked_steps = if step.status == StepStatus::Completed {
            bundle
                .steps
                .iter()
                .filter(|s| s.definition.prerequisites.contains(&step_number))
                .filter(|s| s.status != StepStatus::Waiting)
                .map(StepState::step_number)
                .collect()
        } else {
            Vec::new()
        };
        Self {
            unlocked_steps,
            unchanged: false,
            ..Self::unchanged(bundle, step)
        }
    }
}

/// Lazy, single-pass listing of claimable units over one store snapshot
///
/// Items were claimable when the snapshot was taken; by the time one is
/// claimed another operator may have won it.
#[derive(Debug)]
pub struct AvailableWork {
    bundles: std::vec::IntoIter<Bundle>,
    current: Option<Bundle>,
    step_index: usize,
    machine_types: HashSet<String>,
}

impl AvailableWork {
    fn new(bundles: Vec<Bundle>, machine_types: HashSet<String>) -> Self {
        Self {
            bundles: bundles.into_iter(),
            current: None,
            step_index: 0,
            machine_types,
        }
    }
}

impl Iterator for AvailableWork {
    type Item = WorkUnit;

    fn next(&mut self) -> Option<WorkUnit> {
        loop {
            if let Some(bundle) = &self.current {
                while let Some(step) = bundle.steps.get(self.step_index) {
                    self.step_index += 1;
                    if step.is_claimable() && self.machine_types.contains(step.machine_type()) {
                        return Some(WorkUnit {
                            bundle_id: bundle.bundle_id.clone(),
                            step_number: step.step_number(),
                            operation: step.definition.operation.clone(),
                            machine_type: step.definition.machine_type.clone(),
                            pieces: bundle.pieces,
                            price_per_piece: step.price_per_piece(),
                            lot_number: bundle.lot_number.clone(),
                        });
                    }
                }
            }
            self.current = Some(self.bundles.next()?);
            self.step_index = 0;
        }
    }
}

/// What a single read-compute pass decided
enum Plan<T> {
    /// Nothing to write
    Settled { result: T, events: Vec<FlowEvent> },
    Commit {
        updated: Bundle,
        /// Guard every unwritten step of the bundle as well
        guard_bundle: bool,
        result: T,
        events: Vec<FlowEvent>,
    },
}

impl<T> Plan<T> {
    fn settled(result: T) -> Self {
        Self::Settled {
            result,
            events: Vec::new(),
        }
    }
}

enum Attempt<T> {
    Finished(T),
    Conflict { step_number: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConflict {
    Fail,
    Reread,
}

#[derive(Clone)]
pub struct WorkClaimCoordinator {
    store: Arc<dyn WorkStore>,
    publisher: EventPublisher,
    retry: RetryPolicy,
    max_conflict_retries: u32,
}

impl std::fmt::Debug for WorkClaimCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkClaimCoordinator")
            .field("retry", &self.retry)
            .field("max_conflict_retries", &self.max_conflict_retries)
            .finish_non_exhaustive()
    }
}

impl WorkClaimCoordinator {
    pub fn new(store: Arc<dyn WorkStore>, publisher: EventPublisher) -> Self {
        Self::with_config(store, publisher, &ClaimConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn WorkStore>,
        publisher: EventPublisher,
        config: &ClaimConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            retry: RetryPolicy::from_config(config),
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkStore> {
        &self.store
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// Current state of one bundle
    pub async fn bundle_snapshot(&self, bundle_id: &BundleId) -> Result<Bundle> {
        self.store
            .load_bundle(bundle_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("bundle {bundle_id}")))
    }

    /// Claimable units whose machine type is one of `machine_types`
    #[instrument(skip(self, machine_types))]
    pub async fn list_available_work<I, S>(&self, machine_types: I) -> Result<AvailableWork>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let machine_types: HashSet<String> = machine_types.into_iter().map(Into::into).collect();
        let bundles = self
            .retry
            .run("list_available_work", move |_| async move {
                Ok(self.store.active_bundles().await?)
            })
            .await?;
        debug!(
            bundles = bundles.len(),
            machine_types = ?machine_types,
            "Listing available work"
        );
        Ok(AvailableWork::new(bundles, machine_types))
    }

    /// Claimable units the operator's machines can run
    pub async fn list_available_work_for(&self, operator: &OperatorInfo) -> Result<AvailableWork> {
        self.list_available_work(operator.machine_types.iter().cloned())
            .await
    }

    /// Atomically assign a ready, unassigned unit to `operator`
    #[instrument(skip(self, operator), fields(operator_id = %operator.operator_id))]
    pub async fn claim(
        &self,
        bundle_id: &BundleId,
        step_number: u32,
        operator: &OperatorInfo,
    ) -> Result<WorkAssignment> {
        let key = ClaimKey::new(bundle_id.clone(), step_number, operator.operator_id.clone());

        let result = self
            .mutate(bundle_id, "claim", OnConflict::Fail, |bundle: &Bundle, retrying: bool| {
                let step = find_step(bundle, step_number)?;
                if !operator.can_operate(step.machine_type()) {
                    return Err(FlowError::MachineIncompatible {
                        operator_id: operator.operator_id.clone(),
                        machine_type: step.machine_type().to_string(),
                    });
                }

                if retrying {
                    if let Some(existing) = step.assignment.as_ref().filter(|a| a.claim_key == key) {
                        debug!(claim_key = %key, "Earlier claim attempt had committed");
                        return Ok(Plan::Settled {
                            result: existing.clone(),
                            events: vec![claimed_event(existing)],
                        });
                    }
                }

                if !step.is_claimable() {
                    let reason = match step.assigned_operator_id() {
                        Some(holder) => format!("already held by {holder}"),
                        None => format!("step is {}", step.status),
                    };
                    return Err(FlowError::claim_conflict(bundle_id, step_number, reason));
                }

                let assignment = WorkAssignment::new(
                    bundle.bundle_id.clone(),
                    step_number,
                    &operator.operator_id,
                    &operator.name,
                );
                let mut updated = bundle.clone();
                StepStateMachine::transition(
                    &mut updated,
                    step_number,
                    StepEvent::Claim(assignment.clone()),
                )
                .map_err(|e| FlowError::claim_conflict(bundle_id, step_number, e.to_string()))?;

                Ok(Plan::Commit {
                    events: vec![claimed_event(&assignment)],
                    updated,
                    guard_bundle: false,
                    result: assignment,
                })
            })
            .await;

        match &result {
            Ok(_) => log_claim_operation(
                "claim",
                bundle_id.as_str(),
                step_number,
                Some(&operator.operator_id),
                "success",
                None,
            ),
            Err(err) => debug!(error = %err, "Claim rejected"),
        }
        result
    }

    /// Give a unit back; only its current assignee may call this
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        bundle_id: &BundleId,
        step_number: u32,
        operator_id: &str,
    ) -> Result<()> {
        let mut released: Option<WorkAssignment> = None;

        self.mutate(bundle_id, "release", OnConflict::Reread, |bundle: &Bundle, retrying: bool| {
            let step = find_step(bundle, step_number)?;
            if let Some(previous) = landed_release(step, released.as_ref(), retrying) {
                debug!(operator_id = %previous.operator_id, "Earlier release attempt had committed");
                return Ok(Plan::Settled {
                    result: (),
                    events: vec![released_event(previous)],
                });
            }
            if !step.is_assigned_to(operator_id) {
                return Err(FlowError::not_assigned(bundle_id, step_number, operator_id));
            }

            released = step.assignment.clone();
            let mut updated = bundle.clone();
            StepStateMachine::transition(&mut updated, step_number, StepEvent::Release)?;
            Ok(Plan::Commit {
                updated,
                guard_bundle: false,
                result: (),
                events: released.iter().map(released_event).collect(),
            })
        })
        .await?;

        log_claim_operation(
            "release",
            bundle_id.as_str(),
            step_number,
            Some(operator_id),
            "success",
            None,
        );
        Ok(())
    }

    /// Release a unit regardless of who holds it
    ///
    /// Authority is the caller's to establish. Returns the assignment that was
    /// removed.
    #[instrument(skip(self))]
    pub async fn supervisor_release(
        &self,
        bundle_id: &BundleId,
        step_number: u32,
        supervisor_id: &str,
    ) -> Result<Option<WorkAssignment>> {
        let mut released: Option<WorkAssignment> = None;

        let removed = self
            .mutate(
                bundle_id,
                "supervisor_release",
                OnConflict::Reread,
                |bundle: &Bundle, retrying: bool| {
                    let step = find_step(bundle, step_number)?;
                    if let Some(previous) = landed_release(step, released.as_ref(), retrying) {
                        return Ok(Plan::Settled {
                            events: vec![released_event(previous)],
                            result: Some(previous.clone()),
                        });
                    }
                    let Some(assignment) = step.assignment.clone() else {
                        return Err(FlowError::InvalidTransition(format!(
                            "Bundle {bundle_id} step {step_number} is {} and has no assignment",
                            step.status
                        )));
                    };

                    let mut updated = bundle.clone();
                    StepStateMachine::transition(&mut updated, step_number, StepEvent::Release)?;
                    released = Some(assignment.clone());
                    Ok(Plan::Commit {
                        updated,
                        guard_bundle: false,
                        events: vec![released_event(&assignment)],
                        result: Some(assignment),
                    })
                },
            )
            .await?;

        if let Some(assignment) = &removed {
            info!(
                released_operator = %assignment.operator_id,
                "Supervisor released work unit"
            );
        }
        Ok(removed)
    }

    /// Record the cumulative pieces the assignee has finished for a unit
    ///
    /// Reaching the bundle's piece count completes the step, clears the
    /// assignment and unlocks dependents in the same commit. Reports above the
    /// bundle size are capped. Repeating the recorded value writes nothing and
    /// publishes nothing; a lower value is rejected.
    #[instrument(skip(self))]
    pub async fn complete_pieces(
        &self,
        bundle_id: &BundleId,
        step_number: u32,
        operator_id: &str,
        completed_pieces: u32,
    ) -> Result<CompletionOutcome> {
        let mut planned_write = false;

        let outcome = self
            .mutate(
                bundle_id,
                "complete_pieces",
                OnConflict::Reread,
                |bundle: &Bundle, retrying: bool| {
                    let plan = plan_completion(
                        bundle,
                        step_number,
                        operator_id,
                        completed_pieces,
                        retrying && planned_write,
                    )?;
                    planned_write |= matches!(plan, Plan::Commit { .. });
                    Ok(plan)
                },
            )
            .await?;
        if !outcome.unchanged {
            log_claim_operation(
                "complete_pieces",
                bundle_id.as_str(),
                step_number,
                Some(operator_id),
                if outcome.step_completed {
                    "completed"
                } else {
                    "progress"
                },
                None,
            );
        }
        if outcome.bundle_completed && !outcome.unchanged {
            info!(bundle_id = %bundle_id, "Bundle completed");
        }
        Ok(outcome)
    }

    /// Rewrite the piece rate of one step of one bundle; the template is untouched
    #[instrument(skip(self))]
    pub async fn override_step_price(
        &self,
        bundle_id: &BundleId,
        step_number: u32,
        price_per_piece: f64,
    ) -> Result<()> {
        validate_price(price_per_piece)?;

        self.mutate(
            bundle_id,
            "override_step_price",
            OnConflict::Reread,
            |bundle: &Bundle, _retrying: bool| {
                let step = find_step(bundle, step_number)?;
                if step.price_per_piece() == price_per_piece {
                    return Ok(Plan::settled(()));
                }
                let mut updated = bundle.clone();
                if let Some(step) = updated.step_mut(step_number) {
                    step.definition.price_per_piece = price_per_piece;
                }
                Ok(Plan::Commit {
                    updated,
                    guard_bundle: false,
                    result: (),
                    events: Vec::new(),
                })
            },
        )
        .await?;

        info!(price_per_piece = price_per_piece, "Step price overridden");
        Ok(())
    }

    /// Live assignments claimed more than `max_idle` ago, oldest first
    ///
    /// A report only; nothing is released.
    #[instrument(skip(self))]
    pub async fn stale_assignments(&self, max_idle: Duration) -> Result<Vec<WorkAssignment>> {
        let max_idle = chrono::Duration::from_std(max_idle)
            .map_err(|e| FlowError::ValidationError(format!("Invalid idle threshold: {e}")))?;
        let bundles = self
            .retry
            .run("stale_assignments", move |_| async move {
                Ok(self.store.active_bundles().await?)
            })
            .await?;

        let now = Utc::now();
        let mut stale: Vec<WorkAssignment> = bundles
            .iter()
            .flat_map(|bundle| bundle.live_assignments())
            .filter(|assignment| assignment.idle_for(now) > max_idle)
            .cloned()
            .collect();
        stale.sort_by_key(|assignment| assignment.claimed_at);

        if !stale.is_empty() {
            warn!(count = stale.len(), "Stale work assignments found");
        }
        Ok(stale)
    }

    /// Read, plan, commit; transient failures back off per the retry policy,
    /// version conflicts re-read when allowed
    ///
    /// The plan closure learns whether an earlier attempt of this call hit a
    /// transient failure, in which case that attempt may already have committed.
    async fn mutate<T, F>(
        &self,
        bundle_id: &BundleId,
        operation: &'static str,
        on_conflict: OnConflict,
        plan: F,
    ) -> Result<T>
    where
        F: FnMut(&Bundle, bool) -> Result<Plan<T>> + Send,
        T: Send,
    {
        let plan = Mutex::new(plan);
        let plan = &plan;
        self.retry
            .run(operation, move |attempt_number| async move {
                self.settle(bundle_id, operation, on_conflict, attempt_number > 1, plan)
                    .await
            })
            .await
    }

    /// Plan and commit until the commit lands or a conflict is final
    async fn settle<T, F>(
        &self,
        bundle_id: &BundleId,
        operation: &'static str,
        on_conflict: OnConflict,
        retrying: bool,
        plan: &Mutex<F>,
    ) -> Result<T>
    where
        F: FnMut(&Bundle, bool) -> Result<Plan<T>> + Send,
        T: Send,
    {
        let mut conflicts: u32 = 0;
        loop {
            let step_number = match self.attempt(bundle_id, retrying, plan).await? {
                Attempt::Finished(value) => return Ok(value),
                Attempt::Conflict { step_number } => step_number,
            };

            if on_conflict == OnConflict::Fail {
                return Err(FlowError::claim_conflict(
                    bundle_id,
                    step_number,
                    "unit changed since it was read",
                ));
            }
            conflicts += 1;
            if conflicts > self.max_conflict_retries {
                return Err(FlowError::claim_conflict(
                    bundle_id,
                    step_number,
                    format!("gave up after {conflicts} concurrent modifications"),
                ));
            }
            debug!(
                operation = operation,
                conflicts = conflicts,
                step_number = step_number,
                "Bundle changed concurrently, re-reading"
            );
            tokio::task::yield_now().await;
        }
    }

    async fn attempt<T, F>(
        &self,
        bundle_id: &BundleId,
        retrying: bool,
        plan: &Mutex<F>,
    ) -> Result<Attempt<T>>
    where
        F: FnMut(&Bundle, bool) -> Result<Plan<T>> + Send,
        T: Send,
    {
        let bundle = self.bundle_snapshot(bundle_id).await?;

        let planned = {
            let mut plan = plan.lock();
            (&mut *plan)(&bundle, retrying)
        };

        let (changeset, result, events) = match planned? {
            Plan::Settled { result, events } => {
                self.publish(events);
                return Ok(Attempt::Finished(result));
            }
            Plan::Commit {
                updated,
                guard_bundle,
                result,
                events,
            } => (Changeset::diff(&bundle, &updated, guard_bundle), result, events),
        };

        if changeset.is_empty() {
            return Ok(Attempt::Finished(result));
        }

        match self.store.commit(changeset).await? {
            CommitOutcome::Committed => {
                self.publish(events);
                Ok(Attempt::Finished(result))
            }
            CommitOutcome::VersionConflict { step_number } => {
                Ok(Attempt::Conflict { step_number })
            }
        }
    }

    fn publish(&self, events: Vec<FlowEvent>) {
        for event in events {
            let natural_key = event.natural_key();
            if let Err(err) = self.publisher.publish(event) {
                log_error(
                    "work_claim_coordinator",
                    "publish",
                    &err.to_string(),
                    Some(&natural_key),
                );
            }
        }
    }
}

fn find_step(bundle: &Bundle, step_number: u32) -> Result<&StepState> {
    bundle.step(step_number).ok_or_else(|| {
        FlowError::NotFound(format!("step {step_number} of bundle {}", bundle.bundle_id))
    })
}

fn claimed_event(assignment: &WorkAssignment) -> FlowEvent {
    FlowEvent::WorkClaimed {
        bundle_id: assignment.bundle_id.clone(),
        step_number: assignment.step_number,
        operator_id: assignment.operator_id.clone(),
    }
}

fn released_event(assignment: &WorkAssignment) -> FlowEvent {
    FlowEvent::WorkReleased {
        bundle_id: assignment.bundle_id.clone(),
        step_number: assignment.step_number,
        operator_id: assignment.operator_id.clone(),
    }
}

/// The assignment an earlier attempt removed, if that removal is already
/// committed: the unit no longer carries it
fn landed_release<'a>(
    step: &StepState,
    previous: Option<&'a WorkAssignment>,
    retrying: bool,
) -> Option<&'a WorkAssignment> {
    previous.filter(|previous| retrying && step.assignment.as_ref() != Some(*previous))
}

/// StepCompleted, then StepsUnlocked if any, then BundleCompleted if the
/// bundle is done
fn completion_events(outcome: &CompletionOutcome) -> Vec<FlowEvent> {
    let mut events = vec![FlowEvent::StepCompleted {
        bundle_id: outcome.bundle_id.clone(),
        step_number: outcome.step_number,
    }];
    if !outcome.unlocked_steps.is_empty() {
        events.push(FlowEvent::StepsUnlocked {
            bundle_id: outcome.bundle_id.clone(),
            step_numbers: outcome.unlocked_steps.clone(),
        });
    }
    if outcome.bundle_completed {
        events.push(FlowEvent::BundleCompleted {
            bundle_id: outcome.bundle_id.clone(),
        });
    }
    events
}

/// `resumed` is set when an earlier attempt of the same call planned a write
/// and then hit a transient failure; a state matching that write is then this
/// call's own result rather than a caller repeat.
fn plan_completion(
    bundle: &Bundle,
    step_number: u32,
    operator_id: &str,
    completed_pieces: u32,
    resumed: bool,
) -> Result<Plan<CompletionOutcome>> {
    let step = find_step(bundle, step_number)?;

    if step.status == StepStatus::Completed {
        if step.completed_by.as_deref() != Some(operator_id) {
            return Err(FlowError::not_assigned(&bundle.bundle_id, step_number, operator_id));
        }
        if !resumed {
            return Ok(Plan::settled(CompletionOutcome::unchanged(bundle, step)));
        }
        let outcome = CompletionOutcome::resumed(bundle, step);
        return Ok(Plan::Settled {
            events: completion_events(&outcome),
            result: outcome,
        });
    }

    if !step.is_assigned_to(operator_id) {
        return Err(FlowError::not_assigned(&bundle.bundle_id, step_number, operator_id));
    }

    let reported = completed_pieces.min(bundle.pieces);
    if reported < step.completed_pieces {
        return Err(FlowError::ValidationError(format!(
            "Completed pieces for bundle {} step {step_number} cannot decrease from {} to {reported}",
            bundle.bundle_id, step.completed_pieces
        )));
    }
    if reported == step.completed_pieces {
        let outcome = if resumed {
            CompletionOutcome::resumed(bundle, step)
        } else {
            CompletionOutcome::unchanged(bundle, step)
        };
        return Ok(Plan::settled(outcome));
    }

    let mut updated = bundle.clone();
    if let Some(step) = updated.step_mut(step_number) {
        step.completed_pieces = reported;
    }

    let mut outcome = CompletionOutcome {
        bundle_id: bundle.bundle_id.clone(),
        step_number,
        completed_pieces: reported,
        step_completed: false,
        unlocked_steps: Vec::new(),
        bundle_completed: false,
        unchanged: false,
    };

    if reported < bundle.pieces {
        return Ok(Plan::Commit {
            updated,
            guard_bundle: false,
            result: outcome,
            events: Vec::new(),
        });
    }

    outcome.unlocked_steps = StepDependencyResolver::on_step_completed(&mut updated, step_number)?;
    if let Some(step) = updated.step_mut(step_number) {
        step.completed_by = Some(operator_id.to_string());
    }
    outcome.step_completed = true;
    outcome.bundle_completed = updated.is_complete();

    Ok(Plan::Commit {
        events: completion_events(&outcome),
        updated,
        guard_bundle: true,
        result: outcome,
    })
}
