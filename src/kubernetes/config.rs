//! Kubeconfig introspection
//!
//! Parses kubeconfig files (typically ~/.kube/config) just far enough to
//! enumerate contexts for the presentation layer. Client construction goes
//! through the kube crate, which does its own full parse.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KubeConfigError {
    #[error("Failed to read kubeconfig: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse kubeconfig: {0}")]
    ParseError(String),
    #[error("No kubeconfig found")]
    NotFound,
}

/// A context entry from kubeconfig
#[derive(Debug, Clone)]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
    pub namespace: Option<String>,
}

/// Parsed kubeconfig, reduced to what the context switcher needs
#[derive(Debug, Clone)]
pub struct KubeConfig {
    pub path: PathBuf,
    pub current_context: Option<String>,
    pub contexts: Vec<KubeContext>,
}

impl KubeConfig {
    /// Get the default kubeconfig path
    pub fn default_path() -> Result<PathBuf, KubeConfigError> {
        // Check KUBECONFIG env var first
        if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
            let path = PathBuf::from(kubeconfig.split(':').next().unwrap_or(&kubeconfig));
            if path.exists() {
                return Ok(path);
            }
        }

        // Fall back to ~/.kube/config
        let home = dirs::home_dir().ok_or(KubeConfigError::NotFound)?;
        let path = home.join(".kube").join("config");
        if path.exists() {
            Ok(path)
        } else {
            Err(KubeConfigError::NotFound)
        }
    }

    /// Load kubeconfig from a specific path
    pub fn load_from(path: &Path) -> Result<Self, KubeConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path.to_path_buf())
    }

    /// Parse kubeconfig YAML content
    fn parse(content: &str, path: PathBuf) -> Result<Self, KubeConfigError> {
        let yaml: serde_json::Value = serde_yaml_ng::from_str(content)
            .map_err(|e| KubeConfigError::ParseError(e.to_string()))?;

        let current_context = yaml.get("current-context")
            .and_then(|v| v.as_str())
            .map(String::from);

        let mut contexts = Vec::new();
        if let Some(context_list) = yaml.get("contexts").and_then(|v| v.as_array()) {
            for context in context_list {
                if let (Some(name), Some(context_data)) = (
                    context.get("name").and_then(|v| v.as_str()),
                    context.get("context"),
                ) {
                    contexts.push(KubeContext {
                        name: name.to_string(),
                        cluster: context_data.get("cluster")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string(),
                        namespace: context_data.get("namespace")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                    });
                }
            }
        }

        Ok(Self {
            path,
            current_context,
            contexts,
        })
    }

    /// Context names in declaration order
    pub fn context_names(&self) -> Vec<String> {
        self.contexts.iter().map(|c| c.name.clone()).collect()
    }

    /// Get a context by name
    pub fn get_context(&self, name: &str) -> Option<&KubeContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    /// The context to use when none was requested: the file's current
    /// context if set, otherwise the first declared one.
    pub fn preferred_context(&self) -> Option<String> {
        self.current_context
            .clone()
            .or_else(|| self.contexts.first().map(|c| c.name.clone()))
    }
}
