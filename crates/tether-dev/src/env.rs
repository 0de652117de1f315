//! Environment lookup for dev commands.

use crate::events::CompleteEvent;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Prefix of the variables carrying linked resource properties.
pub const RESOURCE_ENV_PREFIX: &str = "SST_RESOURCE_";

/// Assembles the environment of a dev command from the latest deployment.
#[async_trait]
pub trait EnvProvider: Send + Sync {
    /// Environment for the dev named `name`.
    ///
    /// # Errors
    ///
    /// Implementations return an error when the environment cannot be
    /// assembled; the control endpoint answers `500` with its message.
    async fn env_for(
        &self,
        snapshot: &CompleteEvent,
        name: &str,
    ) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Declared environment plus one `SST_RESOURCE_<Link>` variable per link.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkEnvProvider;

#[async_trait]
impl EnvProvider for LinkEnvProvider {
    async fn env_for(
        &self,
        snapshot: &CompleteEvent,
        name: &str,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let dev = snapshot
            .devs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("dev '{}' is not part of the deployment", name))?;

        let mut env = dev.environment.clone();
        for link_name in &dev.links {
            let Some(link) = snapshot.links.get(link_name) else {
                tracing::warn!(dev = %name, link = %link_name, "linked resource missing");
                continue;
            };
            env.insert(
                format!("{}{}", RESOURCE_ENV_PREFIX, link_name),
                serde_json::to_string(&link.properties)?,
            );
        }
        Ok(env)
    }
}
