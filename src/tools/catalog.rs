//! Snapshot of the tools a server currently exposes.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::mcp::ToolServer;
use crate::types::ToolDescriptor;

/// Fetches and holds the server's tool descriptors.
///
/// The snapshot is replaced on every `refresh`; nothing is reused across
/// rounds since the server may change what it offers.
pub struct ToolCatalog {
    server: Arc<dyn ToolServer>,
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(server: Arc<dyn ToolServer>) -> Self {
        Self {
            server,
            tools: Vec::new(),
        }
    }

    /// Re-fetch the listing from the server.
    pub async fn refresh(&mut self) -> BridgeResult<&[ToolDescriptor]> {
        let tools = self.server.list_tools().await?;

        let mut seen = HashSet::new();
        for tool in &tools {
            if tool.name.is_empty() {
                return Err(BridgeError::ServerUnavailable(
                    "malformed tool listing: empty tool name".into(),
                ));
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(BridgeError::ServerUnavailable(format!(
                    "malformed tool listing: duplicate tool '{}'",
                    tool.name
                )));
            }
        }

        debug!("Catalog refreshed: {} tools", tools.len());
        self.tools = tools;
        Ok(&self.tools)
    }

    /// Tool names from the last refresh, in listing order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockToolServer;

    #[tokio::test]
    async fn refresh_replaces_snapshot() {
        let server = Arc::new(MockToolServer::weather());
        let mut catalog = ToolCatalog::new(server.clone());
        assert!(catalog.names().is_empty());

        let tools = catalog.refresh().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(catalog.names(), vec!["get_weather"]);

        server.set_tools(vec![]);
        catalog.refresh().await.unwrap();
        assert!(catalog.names().is_empty());
        assert_eq!(server.list_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_names_are_a_malformed_listing() {
        let server = Arc::new(MockToolServer::weather());
        let tool = MockToolServer::weather_descriptor();
        server.set_tools(vec![tool.clone(), tool]);

        let mut catalog = ToolCatalog::new(server);
        let err = catalog.refresh().await.unwrap_err();
        assert!(matches!(err, BridgeError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn closed_channel_surfaces_server_unavailable() {
        let server = Arc::new(MockToolServer::weather());
        server.close().await.unwrap();

        let mut catalog = ToolCatalog::new(server);
        assert!(matches!(
            catalog.refresh().await,
            Err(BridgeError::ServerUnavailable(_))
        ));
    }
}
