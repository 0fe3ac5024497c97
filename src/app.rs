//! Firebase App
//!
//! The App is the central configuration object: it carries the host
//! application's identity (API key, project ID) that Firestore clients
//! associate themselves with.

use crate::error::FirebaseError;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name used when `AppOptions::app_name` is `None`
pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// Global map of App names to App instances
static APP_INSTANCES: Lazy<RwLock<HashMap<String, App>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Firebase App instance
///
/// Each app name has at most one App instance (singleton pattern).
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    name: String,
    options: AppOptions,
}

/// Firebase App configuration options
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppOptions {
    /// Firebase API key
    pub api_key: String,
    /// Google Cloud project ID
    pub project_id: String,
    /// App name (optional, defaults to "[DEFAULT]")
    pub app_name: Option<String>,
}

impl App {
    /// Create a new Firebase App with the given options
    ///
    /// If an app with the same name already exists, returns the existing instance.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use firestore_rust_sdk::{App, AppOptions};
    ///
    /// let options = AppOptions {
    ///     api_key: "YOUR_API_KEY".to_string(),
    ///     project_id: "your-project-id".to_string(),
    ///     app_name: None,
    /// };
    /// let app = App::create(options).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create(options: AppOptions) -> Result<Self, FirebaseError> {
        if options.api_key.is_empty() {
            return Err(FirebaseError::ApiKeyNotConfigured);
        }
        if options.project_id.is_empty() {
            return Err(FirebaseError::Internal(
                "Project ID cannot be empty".to_string(),
            ));
        }

        let name = match options.app_name.clone() {
            None => DEFAULT_APP_NAME.to_string(),
            Some(n) => n,
        };

        let mut instances = APP_INSTANCES.write().await;

        if let Some(app) = instances.get(&name) {
            return Ok(app.clone());
        }

        let app = App {
            inner: Arc::new(AppInner {
                name: name.clone(),
                options,
            }),
        };
        tracing::debug!(app = %name, "created Firebase app");

        instances.insert(name, app.clone());

        Ok(app)
    }

    /// Get the default Firebase App instance
    pub async fn get_instance() -> Result<Self, FirebaseError> {
        Self::get_instance_with_name(DEFAULT_APP_NAME).await
    }

    /// Get a named Firebase App instance
    pub async fn get_instance_with_name(name: &str) -> Result<Self, FirebaseError> {
        let instances = APP_INSTANCES.read().await;
        instances
            .get(name)
            .cloned()
            .ok_or_else(|| FirebaseError::AppNotFound(name.to_string()))
    }

    /// Get the app name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the app options
    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    /// Project the app belongs to
    pub fn project_id(&self) -> &str {
        &self.inner.options.project_id
    }

    /// An app outside the global registry
    #[cfg(test)]
    pub(crate) fn detached(project_id: &str) -> Self {
        App {
            inner: Arc::new(AppInner {
                name: format!("detached-{}", project_id),
                options: AppOptions {
                    api_key: "test-api-key".to_string(),
                    project_id: project_id.to_string(),
                    app_name: None,
                },
            }),
        }
    }
}

impl PartialEq for App {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.inner.name)
            .field("project_id", &self.inner.options.project_id)
            .finish()
    }
}
