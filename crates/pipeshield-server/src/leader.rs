//! Lease-based leadership gate for the reconciler.
//!
//! At most one replica cluster-wide may run the reconciler: under the
//! hysteresis strategy two writers disagreeing on the current state could
//! thrash the gate. Leadership is arbitrated through a
//! `coordination.k8s.io/v1` Lease: acquire when free or expired, renew at a
//! fraction of the lease duration, and treat loss of leadership exactly like
//! cancellation — the guarded task's token is cancelled and the replica goes
//! back to campaigning.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, PostParams};
use tokio_util::sync::CancellationToken;

const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);

pub struct LeaderGate {
    api: Api<Lease>,
    name: String,
    identity: String,
    lease_duration: Duration,
    /// How often we renew while leading, and retry while campaigning.
    poll_period: Duration,
}

impl LeaderGate {
    pub fn new(client: kube::Client, namespace: &str, name: &str, identity: String) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            identity,
            lease_duration: DEFAULT_LEASE_DURATION,
            poll_period: DEFAULT_LEASE_DURATION / 3,
        }
    }

    /// Run `task` whenever this replica holds the lease, until `cancel`.
    ///
    /// The task receives a child token that is cancelled the moment
    /// leadership is lost or renewal fails; a fresh task is started if
    /// leadership is later re-acquired.
    pub async fn guard<F, Fut>(&self, cancel: CancellationToken, mut task: F)
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            // Campaign.
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match self.try_acquire().await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(lease = %self.name, error = %err, "lease acquisition attempt failed");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_period) => {}
                    _ = cancel.cancelled() => return,
                }
            }
            tracing::info!(lease = %self.name, identity = %self.identity, "acquired leadership");

            let term = cancel.child_token();
            let mut handle = tokio::spawn(task(term.clone()));

            // Renew until lost, failed, or cancelled.
            let mut task_exited = false;
            let lost = loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_period) => {
                        match self.try_acquire().await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(lease = %self.name, "lost leadership to another holder");
                                break true;
                            }
                            Err(err) => {
                                tracing::warn!(lease = %self.name, error = %err, "lease renewal failed, stepping down");
                                break true;
                            }
                        }
                    }
                    _ = cancel.cancelled() => break false,
                    _ = &mut handle => {
                        task_exited = true;
                        break false;
                    }
                }
            };

            term.cancel();
            if !task_exited {
                let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
            }
            if cancel.is_cancelled() {
                return;
            }
            if lost {
                tracing::info!(lease = %self.name, "re-entering leadership campaign");
            }
        }
    }

    /// Acquire the lease if it is free, expired, or already ours; renew it if
    /// ours. Returns whether we hold it afterwards. Conflicting writers are
    /// resolved by the apiserver's resourceVersion check: the loser simply
    /// observes `false`.
    async fn try_acquire(&self) -> Result<bool, kube::Error> {
        let now = MicroTime(Utc::now());
        match self.api.get_opt(&self.name).await? {
            None => {
                let lease = Lease {
                    metadata: kube::api::ObjectMeta {
                        name: Some(self.name.clone()),
                        ..Default::default()
                    },
                    spec: Some(self.owned_spec(now.clone(), now, 1)),
                };
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(err) => Err(err),
                }
            }
            Some(current) => {
                let spec = current.spec.clone().unwrap_or_default();
                let ours = spec.holder_identity.as_deref() == Some(self.identity.as_str());
                if !ours && !Self::expired(&spec) {
                    return Ok(false);
                }

                let transitions = spec.lease_transitions.unwrap_or(0) + i32::from(!ours);
                let acquire_time = if ours {
                    spec.acquire_time.clone().unwrap_or_else(|| now.clone())
                } else {
                    now.clone()
                };
                let mut lease = current;
                lease.spec = Some(self.owned_spec(acquire_time, now, transitions));
                match self.api.replace(&self.name, &PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn owned_spec(&self, acquire_time: MicroTime, renew_time: MicroTime, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: Some(acquire_time),
            renew_time: Some(renew_time),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    fn expired(spec: &LeaseSpec) -> bool {
        let Some(renew_time) = &spec.renew_time else {
            return true;
        };
        let duration = chrono::Duration::seconds(i64::from(spec.lease_duration_seconds.unwrap_or(0)));
        renew_time.0 + duration < Utc::now()
    }
}
