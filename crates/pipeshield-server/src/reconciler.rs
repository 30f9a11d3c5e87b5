//! Periodic gate-state reconciliation.
//!
//! On each tick the reconciler asks the metrics backend for evidence, decides
//! the next gate state, and writes it to the decision store unconditionally
//! (the write is idempotent, so an unchanged state costs nothing and keeps
//! the loop stateless). A failing pass is logged and skipped; the loop only
//! exits on cancellation. The gate can therefore lag the true backend state
//! by at most one interval plus one failed-and-skipped interval.

use std::sync::Arc;

use pipeshield_core::{GateState, StoredGate, StrategySpec};
use pipeshield_metrics::{AlertQuerier, InstantQuerier, MetricsError};
use pipeshield_store::{DecisionStore, StoreError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Decision strategy, resolved once from configuration.
#[derive(Clone)]
pub enum Strategy {
    /// Mirror a single alert: the gate is open exactly while the alert is
    /// not firing. Needs no current state, so it never reads the store.
    AlertMirror {
        alerts: Arc<dyn AlertQuerier>,
        alert_name: String,
    },

    /// Two-query hysteresis. While the gate is open only the disable query
    /// is consulted; while closed only the enable query is. The two queries
    /// need not be exact negations, which gives the gate a dead zone and
    /// keeps a borderline metric from flapping it every tick.
    Hysteresis {
        queries: Arc<dyn InstantQuerier>,
        disable_query: String,
        enable_query: String,
    },
}

impl Strategy {
    pub fn alert_mirror(alerts: Arc<dyn AlertQuerier>, alert_name: String) -> Self {
        Strategy::AlertMirror { alerts, alert_name }
    }

    pub fn hysteresis(
        queries: Arc<dyn InstantQuerier>,
        disable_query: String,
        enable_query: String,
    ) -> Self {
        Strategy::Hysteresis {
            queries,
            disable_query,
            enable_query,
        }
    }

    /// Build a strategy from its config form and a client providing both
    /// querier capabilities.
    pub fn from_spec<C>(spec: StrategySpec, client: Arc<C>) -> Self
    where
        C: AlertQuerier + InstantQuerier + 'static,
    {
        match spec {
            StrategySpec::AlertMirror { alert_name } => Self::alert_mirror(client, alert_name),
            StrategySpec::Hysteresis {
                disable_query,
                enable_query,
            } => Self::hysteresis(client, disable_query, enable_query),
        }
    }

    /// Whether `decide` consults the current stored state.
    fn needs_current(&self) -> bool {
        matches!(self, Strategy::Hysteresis { .. })
    }

    /// Compute the next gate state from the current stored state.
    pub async fn decide(&self, current: StoredGate) -> Result<GateState, MetricsError> {
        match self {
            Strategy::AlertMirror { alerts, alert_name } => {
                let firing = alerts.is_alert_firing(alert_name).await?;
                tracing::info!(alert = %alert_name, firing, "pipeline run ingress status");
                Ok(GateState::from_allowed(!firing))
            }
            Strategy::Hysteresis {
                queries,
                disable_query,
                enable_query,
            } => {
                // The comparison against "0" is textual on purpose: any
                // other result text, "0.5" and "-1" included, asserts the
                // condition.
                if current.allowed_or_default() {
                    let result = queries.query(disable_query).await?;
                    tracing::debug!(query = %disable_query, result = %result, "evaluated disable-ingress query");
                    Ok(GateState::from_allowed(result == "0"))
                } else {
                    let result = queries.query(enable_query).await?;
                    tracing::debug!(query = %enable_query, result = %result, "evaluated enable-ingress query");
                    Ok(GateState::from_allowed(result != "0"))
                }
            }
        }
    }
}

/// The periodic task that recomputes and persists the gate state.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn DecisionStore>,
    strategy: Strategy,
    wait_time: std::time::Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        strategy: Strategy,
        wait_time: std::time::Duration,
    ) -> Self {
        Self {
            store,
            strategy,
            wait_time,
        }
    }

    /// Run until `cancel` fires. Pass failures are logged and skipped; the
    /// next tick retries from scratch.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.wait_time);
        tracing::info!(wait_time = ?self.wait_time, "reconciler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.process().await {
                        tracing::error!(error = %err, "reconciliation pass failed, retrying next tick");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("reconciler stopping");
                    return;
                }
            }
        }
    }

    /// One reconciliation pass: read (if the strategy needs it), decide,
    /// write.
    ///
    /// The alert mirror never consults the store, so transitions are only
    /// logged under hysteresis; the mirror logs its per-tick firing status
    /// instead.
    pub async fn process(&self) -> Result<(), ReconcileError> {
        let current = if self.strategy.needs_current() {
            Some(self.store.read().await?)
        } else {
            None
        };
        let next = self
            .strategy
            .decide(current.unwrap_or(StoredGate::Absent))
            .await?;

        if let Some(current) = current {
            let changed = match current {
                StoredGate::Allowed => !next.is_allowed(),
                StoredGate::Denied => next.is_allowed(),
                StoredGate::Absent => false,
            };
            if changed {
                tracing::info!(from = %current, to = %next, "gate state transition");
            }
        }

        self.store.write(next.is_allowed()).await?;
        Ok(())
    }
}
