//! The optional HTTP inventory API: one POST per object change, carrying the
//! kind, projected payload, cluster label and an action verb.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::SinkResult;
use crate::k8s::kinds::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InventoryAction {
    Added,
    Modified,
    /// The dispatcher always emits this spelling; a receiver accepting the
    /// lowercase `"deleted"` some upstream producers use is a receiver-side
    /// concern, not this crate's (see SPEC_FULL.md §9, Open Questions).
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryItem {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub cluster: String,
    pub action: InventoryAction,
    pub payload: BTreeMap<String, String>,
}

impl InventoryItem {
    pub fn new(
        kind: ResourceKind,
        namespace: Option<String>,
        name: String,
        cluster: impl Into<String>,
        action: InventoryAction,
        payload: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            namespace,
            name,
            cluster: cluster.into(),
            action,
            payload,
        }
    }
}

#[async_trait]
pub trait InventorySink: Send + Sync {
    async fn send(&self, item: &InventoryItem) -> SinkResult<()>;
}

pub struct HttpInventorySink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInventorySink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl InventorySink for HttpInventorySink {
    async fn send(&self, item: &InventoryItem) -> SinkResult<()> {
        let url = format!("{}/inventory", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(item).send().await?;
        if !response.status().is_success() {
            return Err(crate::errors::SinkError::InventoryStatus {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Used when `web_api_enable = false`.
pub struct NullInventorySink;

#[async_trait]
impl InventorySink for NullInventorySink {
    async fn send(&self, _item: &InventoryItem) -> SinkResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_never_fails() {
        let sink = NullInventorySink;
        let item = InventoryItem::new(
            ResourceKind::Pods,
            Some("n".into()),
            "p".into(),
            "cluster",
            InventoryAction::Added,
            BTreeMap::new(),
        );
        sink.send(&item).await.unwrap();
    }

    #[test]
    fn action_serializes_uppercase() {
        let json = serde_json::to_string(&InventoryAction::Deleted).unwrap();
        assert_eq!(json, "\"DELETED\"");
    }
}
