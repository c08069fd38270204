use super::connector::CloudConnector;
use crate::error::{DeployerError, Result};
use crate::models::NodeInstance;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Connectors by cloud name
#[derive(Debug, Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn CloudConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, connector: Arc<dyn CloudConnector>) {
        let cloud = connector.cloud_name().to_string();
        info!(cloud = %cloud, capabilities = ?connector.capabilities(), "Registered cloud connector");
        self.connectors.insert(cloud, connector);
    }

    pub fn with_connector(mut self, connector: Arc<dyn CloudConnector>) -> Self {
        self.register(connector);
        self
    }

    pub fn get(&self, cloud: &str) -> Result<Arc<dyn CloudConnector>> {
        self.connectors.get(cloud).cloned().ok_or_else(|| {
            DeployerError::Configuration(format!("No connector registered for cloud '{cloud}'"))
        })
    }

    pub fn clouds(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    /// Group instances by the cloud they run on
    pub fn group_by_cloud<'a>(
        instances: impl IntoIterator<Item = &'a NodeInstance>,
    ) -> BTreeMap<String, Vec<NodeInstance>> {
        let mut grouped: BTreeMap<String, Vec<NodeInstance>> = BTreeMap::new();
        for instance in instances {
            grouped
                .entry(instance.cloud.clone())
                .or_default()
                .push(instance.clone());
        }
        grouped
    }
}
