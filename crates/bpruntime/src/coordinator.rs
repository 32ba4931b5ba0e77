//! Gateway coordination: running a gateway's branches and joining them.
//!
//! Parallel branches are spawned as tokio tasks. Each branch reports its
//! outcome to a shared [`JoinTally`]; the tally decides, under its lock, the
//! moment the join settles and wakes the coordinator through a oneshot.
//! Branches that settle afterwards are on their own: they are not cancelled
//! (unless `cancel_losers` is set) and continue to their frontier themselves.

use crate::executor::{BranchOverflow, EngineInner, Step};
use crate::plan::Branch;
use bpcore::{ExclusiveConfig, FlowError, JoinMode, NodeId, NodeSpec, Value};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Where a node runs: directly under the run, or inside a gateway branch
#[derive(Clone)]
pub(crate) enum Scope {
    Root,
    Branch(Arc<BranchScope>),
}

pub(crate) struct BranchScope {
    gateway_id: NodeId,
    port: String,
    cancel: CancellationToken,
    /// Join gateways this branch reached, in arrival order
    frontier: Mutex<Vec<NodeId>>,
}

impl Scope {
    pub(crate) fn is_branch(&self) -> bool {
        matches!(self, Scope::Branch(_))
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), FlowError> {
        match self {
            Scope::Branch(branch) if branch.cancel.is_cancelled() => {
                Err(FlowError::BranchCancelled {
                    gateway_id: branch.gateway_id.clone(),
                    port: branch.port.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) async fn defer(&self, join_id: &str) {
        if let Scope::Branch(branch) = self {
            let mut frontier = branch.frontier.lock().await;
            if !frontier.iter().any(|id| id == join_id) {
                debug!(
                    "Branch '{}' of gateway {} reached join {}",
                    branch.port, branch.gateway_id, join_id
                );
                frontier.push(join_id.to_string());
            }
        }
    }

    /// Token for branches started from this scope; nested under the
    /// enclosing branch so cancelling it reaches nested gateways too
    fn child_token(&self) -> CancellationToken {
        match self {
            Scope::Root => CancellationToken::new(),
            Scope::Branch(branch) => branch.cancel.child_token(),
        }
    }
}

struct JoinOutcome {
    /// Ports of the branches whose success settled the join
    ports: Vec<String>,
    frontier: Vec<NodeId>,
}

type Settlement = Result<JoinOutcome, FlowError>;

/// Counting reducer over branch outcomes
struct JoinTally {
    gateway_id: NodeId,
    mode: JoinMode,
    expected: usize,
    succeeded: usize,
    failed: usize,
    ports: Vec<String>,
    frontier: Vec<NodeId>,
    settle: Option<oneshot::Sender<Settlement>>,
}

impl JoinTally {
    fn new(
        gateway_id: NodeId,
        mode: JoinMode,
        expected: usize,
        settle: oneshot::Sender<Settlement>,
    ) -> Self {
        Self {
            gateway_id,
            mode,
            expected,
            succeeded: 0,
            failed: 0,
            ports: Vec::new(),
            frontier: Vec::new(),
            settle: Some(settle),
        }
    }

    /// Record one branch outcome.
    ///
    /// Returns the frontier a branch has to drive itself, which only happens
    /// for a success arriving after the join already settled.
    fn record(&mut self, port: &str, outcome: Result<Vec<NodeId>, FlowError>) -> Option<Vec<NodeId>> {
        if self.settle.is_none() {
            return outcome.ok();
        }

        match outcome {
            Ok(frontier) => {
                self.succeeded += 1;
                match self.mode {
                    JoinMode::All => {
                        self.ports.push(port.to_string());
                        for join in frontier {
                            if !self.frontier.contains(&join) {
                                self.frontier.push(join);
                            }
                        }
                        if self.succeeded == self.expected {
                            let outcome = JoinOutcome {
                                ports: std::mem::take(&mut self.ports),
                                frontier: std::mem::take(&mut self.frontier),
                            };
                            self.finish(Ok(outcome));
                        }
                    }
                    JoinMode::First | JoinMode::Any => {
                        self.finish(Ok(JoinOutcome {
                            ports: vec![port.to_string()],
                            frontier,
                        }));
                    }
                }
            }
            Err(err) => {
                self.failed += 1;
                match self.mode {
                    JoinMode::All | JoinMode::First => self.finish(Err(err)),
                    JoinMode::Any => {
                        if self.failed == self.expected {
                            self.finish(Err(FlowError::AllBranchesFailed {
                                gateway_id: self.gateway_id.clone(),
                                failures: self.failed,
                                last: Box::new(err),
                            }));
                        }
                    }
                }
            }
        }
        None
    }

    fn finish(&mut self, settlement: Settlement) {
        if let Some(tx) = self.settle.take() {
            // the coordinator may be gone if an enclosing branch was dropped
            let _ = tx.send(settlement);
        }
    }
}

/// One spawned branch of a parallel gateway
struct BranchTask {
    engine: Arc<EngineInner>,
    gateway_id: NodeId,
    branch: Branch,
    tally: Arc<Mutex<JoinTally>>,
    cancel: CancellationToken,
    limiter: Option<Arc<Semaphore>>,
}

impl BranchTask {
    async fn run(self) {
        let BranchTask {
            engine,
            gateway_id,
            branch,
            tally,
            cancel,
            limiter,
        } = self;

        let _permit = match limiter {
            Some(limiter) => limiter.acquire_owned().await.ok(),
            None => None,
        };

        engine.store.start_branch(&gateway_id, &branch.port).await;
        debug!("Branch '{}' of gateway {} started", branch.port, gateway_id);

        let scope = Arc::new(BranchScope {
            gateway_id: gateway_id.clone(),
            port: branch.port.clone(),
            cancel: cancel.clone(),
            frontier: Mutex::new(Vec::new()),
        });

        let branch_scope = Scope::Branch(Arc::clone(&scope));
        let result = tokio::select! {
            result = engine.run_branch(&branch, &gateway_id, &branch_scope) => result,
            _ = cancel.cancelled() => {
                let err = FlowError::BranchCancelled {
                    gateway_id: gateway_id.clone(),
                    port: branch.port.clone(),
                };
                let interrupted = engine.store.fail_running(&branch.nodes, &err).await;
                if !interrupted.is_empty() {
                    warn!("Cancelled nodes {:?} of gateway {}", interrupted, gateway_id);
                }
                Err(err)
            }
        };

        let outcome = match result {
            Ok(()) => Ok(std::mem::take(&mut *scope.frontier.lock().await)),
            Err(err) => Err(err),
        };

        engine
            .store
            .settle_branch(&gateway_id, &branch.port, outcome.is_ok())
            .await;
        match &outcome {
            Ok(_) => info!("Branch '{}' of gateway {} completed", branch.port, gateway_id),
            Err(err) => warn!(
                "Branch '{}' of gateway {} failed: {}",
                branch.port, gateway_id, err
            ),
        }

        let late = tally.lock().await.record(&branch.port, outcome);
        if let Some(frontier) = late {
            debug!(
                "Gateway {} settled before branch '{}'; continuing on its own",
                gateway_id, branch.port
            );
            if let Err(err) = engine.drive_frontier(frontier, &Scope::Root).await {
                warn!(
                    "Late continuation of branch '{}' of gateway {} failed: {}",
                    branch.port, gateway_id, err
                );
            }
        }
    }
}

impl EngineInner {
    /// Run a parallel gateway's branches and settle its join.
    ///
    /// Returns the join gateways the settling branches reached; the caller
    /// continues with them in order.
    pub(crate) async fn run_parallel_gateway(
        self: &Arc<Self>,
        node: &NodeSpec,
        scope: &Scope,
    ) -> Result<Vec<Step>, FlowError> {
        let group = self
            .plan
            .parallel_group(&node.id)
            .cloned()
            .ok_or_else(|| FlowError::Execution(format!("no parallel group for {}", node.id)))?;

        let state = self.store.begin(&node.id, true).await?;
        self.callbacks.on_node_start(&state).await;

        let branches = &group.gateway.branches;
        let queued = self.config.branch_overflow == BranchOverflow::Queue;
        let (to_start, held) = match group.join {
            JoinMode::All if !queued => {
                branches.split_at(group.max_concurrency.min(branches.len()))
            }
            _ => (branches.as_slice(), &branches[branches.len()..]),
        };

        for branch in held {
            warn!(
                "Gateway {} caps concurrency at {}; branch '{}' will not run",
                node.id, group.max_concurrency, branch.port
            );
            self.store.hold_branch(&node.id, &branch.port).await;
        }

        if to_start.is_empty() {
            let state = self.store.complete(&node.id, None).await;
            self.callbacks.on_node_complete(&state).await;
            return Ok(Vec::new());
        }

        info!(
            "Gateway {} starting {} of {} branches (join: {})",
            node.id,
            to_start.len(),
            branches.len(),
            group.join
        );

        let (settle_tx, settle_rx) = oneshot::channel();
        let tally = Arc::new(Mutex::new(JoinTally::new(
            node.id.clone(),
            group.join,
            to_start.len(),
            settle_tx,
        )));
        let cancel = scope.child_token();
        let limiter = (group.join == JoinMode::All && queued)
            .then(|| Arc::new(Semaphore::new(group.max_concurrency)));

        for branch in to_start {
            if limiter.is_some() {
                self.store.hold_branch(&node.id, &branch.port).await;
            }
            let task = BranchTask {
                engine: Arc::clone(self),
                gateway_id: node.id.clone(),
                branch: branch.clone(),
                tally: Arc::clone(&tally),
                cancel: cancel.clone(),
                limiter: limiter.clone(),
            };
            let span = info_span!("branch", gateway = %node.id, port = %branch.port);
            tokio::spawn(task.run().instrument(span));
        }
        // only the branches may keep the settle sender alive
        drop(tally);

        let settlement = settle_rx.await.unwrap_or_else(|_| {
            Err(FlowError::Execution(format!(
                "branches of gateway {} stopped without settling",
                node.id
            )))
        });

        if self.config.cancel_losers {
            cancel.cancel();
        }

        match settlement {
            Ok(outcome) => {
                let ports = outcome.ports.into_iter().map(Value::String).collect();
                let state = self.store.complete(&node.id, Some(Value::Array(ports))).await;
                info!("Gateway {} settled", node.id);
                self.callbacks.on_node_complete(&state).await;
                Ok(outcome.frontier.into_iter().map(Step::enter).collect())
            }
            Err(err) => self.fail_node(&node.id, err).await,
        }
    }

    /// Pick an exclusive gateway's branch.
    ///
    /// The gateway stays running until the chosen branch's path finished;
    /// the returned steps run that path and then settle the gateway.
    pub(crate) async fn run_exclusive_gateway(
        self: &Arc<Self>,
        node: &NodeSpec,
        config: &ExclusiveConfig,
    ) -> Result<Vec<Step>, FlowError> {
        let gateway = self
            .plan
            .gateway(&node.id)
            .cloned()
            .ok_or_else(|| FlowError::Execution(format!("no gateway plan for {}", node.id)))?;

        let state = self.store.begin(&node.id, true).await?;
        self.callbacks.on_node_start(&state).await;

        let matched = match &config.condition {
            Some(condition) => {
                let context = self.context_snapshot().await;
                match self
                    .callbacks
                    .evaluate_condition(node, condition, &context)
                    .await
                {
                    Ok(matched) => matched,
                    Err(source) => {
                        let err = FlowError::Node {
                            node_id: node.id.clone(),
                            source,
                        };
                        return self.fail_node(&node.id, err).await;
                    }
                }
            }
            None => false,
        };

        let chosen = matched
            .then(|| gateway.branches.first())
            .flatten()
            .or_else(|| {
                config
                    .default_branch
                    .as_ref()
                    .and_then(|port| gateway.branches.iter().find(|b| &b.port == port))
            });

        let Some(branch) = chosen else {
            info!("Exclusive gateway {} selected no branch", node.id);
            let state = self.store.complete(&node.id, None).await;
            self.callbacks.on_node_complete(&state).await;
            return Ok(Vec::new());
        };

        debug!("Exclusive gateway {} took branch '{}'", node.id, branch.port);
        self.store.start_branch(&node.id, &branch.port).await;
        Ok(vec![
            Step::Run {
                node_id: branch.entry.clone(),
                via: Some(node.id.clone()),
            },
            Step::SettleExclusive {
                gateway_id: node.id.clone(),
                port: branch.port.clone(),
            },
        ])
    }

    /// The chosen branch's path finished; close the exclusive gateway
    pub(crate) async fn settle_exclusive(&self, gateway_id: &str, port: &str) {
        self.store.settle_branch(gateway_id, port, true).await;
        let result = Value::String(port.to_string());
        let state = self.store.complete(gateway_id, Some(result)).await;
        self.callbacks.on_node_complete(&state).await;
    }

    /// The chosen branch's path failed; the gateway fails with it
    pub(crate) async fn abort_exclusive(&self, gateway_id: &str, port: &str, err: &FlowError) {
        self.store.settle_branch(gateway_id, port, false).await;
        self.mark_failed(gateway_id, err).await;
    }

    async fn run_branch(
        self: &Arc<Self>,
        branch: &Branch,
        gateway_id: &str,
        scope: &Scope,
    ) -> Result<(), FlowError> {
        if self.plan.is_join(&branch.entry) {
            scope.defer(&branch.entry).await;
            return Ok(());
        }
        self.execute_node(
            branch.entry.clone(),
            Some(gateway_id.to_string()),
            scope.clone(),
        )
        .await
    }

    /// Enter the join gateways a settled join handed back, in order
    pub(crate) async fn drive_frontier(
        self: &Arc<Self>,
        frontier: Vec<NodeId>,
        scope: &Scope,
    ) -> Result<(), FlowError> {
        let steps = frontier.into_iter().map(Step::enter).collect();
        self.execute_steps(steps, scope.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(mode: JoinMode, expected: usize) -> (JoinTally, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        (JoinTally::new("g".into(), mode, expected, tx), rx)
    }

    fn boom() -> FlowError {
        FlowError::Execution("boom".into())
    }

    #[test]
    fn all_waits_for_every_branch_and_merges_frontiers() {
        let (mut t, mut rx) = tally(JoinMode::All, 2);
        assert!(t.record("a", Ok(vec!["merge".into()])).is_none());
        assert!(rx.try_recv().is_err());
        assert!(t.record("b", Ok(vec!["merge".into()])).is_none());

        let outcome = rx.try_recv().expect("settled").expect("success");
        assert_eq!(outcome.ports, vec!["a", "b"]);
        assert_eq!(outcome.frontier, vec!["merge"]);
    }

    #[test]
    fn all_fails_on_first_failure_and_late_success_drives_itself() {
        let (mut t, mut rx) = tally(JoinMode::All, 2);
        t.record("a", Err(boom()));
        assert!(rx.try_recv().expect("settled").is_err());

        let late = t.record("b", Ok(vec!["merge".into()]));
        assert_eq!(late, Some(vec!["merge".to_string()]));
    }

    #[test]
    fn first_settles_on_first_outcome_even_failure() {
        let (mut t, mut rx) = tally(JoinMode::First, 2);
        t.record("a", Err(boom()));
        assert!(rx.try_recv().expect("settled").is_err());
        assert_eq!(t.record("b", Ok(vec![])), Some(vec![]));
    }

    #[test]
    fn any_tolerates_failures_until_all_failed() {
        let (mut t, mut rx) = tally(JoinMode::Any, 3);
        t.record("a", Err(boom()));
        assert!(rx.try_recv().is_err());
        t.record("b", Ok(vec![]));
        let outcome = rx.try_recv().expect("settled").expect("success");
        assert_eq!(outcome.ports, vec!["b"]);

        let (mut t, mut rx) = tally(JoinMode::Any, 2);
        t.record("a", Err(boom()));
        t.record("b", Err(boom()));
        assert!(matches!(
            rx.try_recv().expect("settled"),
            Err(FlowError::AllBranchesFailed { failures: 2, .. })
        ));
    }
}
