//! ConfigMap-backed decision store.
//!
//! The record is a ConfigMap with the gate value under the `allow` data key.
//! Writes are JSON merge-patches touching only that key, so unrelated data on
//! the same ConfigMap survives; a 404 on patch falls back to create, and a
//! create lost to a concurrent creator falls back to one more patch.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams, PostParams};
use pipeshield_core::{GateState, StoredGate, GATE_KEY};

use crate::traits::{DecisionStore, StoreResult};

pub struct ConfigMapStore {
    api: Api<ConfigMap>,
    namespace: String,
    name: String,
}

impl ConfigMapStore {
    pub fn new(client: kube::Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn gate_patch(value: &str) -> serde_json::Value {
        serde_json::json!({ "data": { GATE_KEY: value } })
    }

    async fn patch_gate(&self, value: &str) -> Result<(), kube::Error> {
        self.api
            .patch(
                &self.name,
                &PatchParams::default(),
                &Patch::Merge(Self::gate_patch(value)),
            )
            .await?;
        Ok(())
    }

    async fn create_with_gate(&self, value: &str) -> Result<(), kube::Error> {
        let mut config_map = ConfigMap::default();
        config_map.metadata.name = Some(self.name.clone());
        config_map.metadata.namespace = Some(self.namespace.clone());
        config_map.data = Some(
            [(GATE_KEY.to_string(), value.to_string())]
                .into_iter()
                .collect(),
        );
        self.api.create(&PostParams::default(), &config_map).await?;
        Ok(())
    }
}

fn status_code_is(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

#[async_trait]
impl DecisionStore for ConfigMapStore {
    async fn read(&self) -> StoreResult<StoredGate> {
        match self.api.get(&self.name).await {
            Ok(config_map) => {
                let value = config_map
                    .data
                    .as_ref()
                    .and_then(|data| data.get(GATE_KEY))
                    .map(String::as_str);
                Ok(StoredGate::from_record_value(value))
            }
            Err(err) if status_code_is(&err, 404) => Ok(StoredGate::Absent),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, allowed: bool) -> StoreResult<()> {
        let value = GateState::from_allowed(allowed).record_value();
        match self.patch_gate(value).await {
            Ok(()) => Ok(()),
            Err(err) if status_code_is(&err, 404) => {
                match self.create_with_gate(value).await {
                    Ok(()) => Ok(()),
                    // Lost the create race; the record exists now, patch it.
                    Err(err) if status_code_is(&err, 409) => {
                        tracing::debug!(
                            namespace = %self.namespace,
                            name = %self.name,
                            "state configmap created concurrently, retrying patch"
                        );
                        self.patch_gate(value).await.map_err(Into::into)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
