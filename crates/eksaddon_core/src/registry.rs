//! Application registry.

use std::collections::BTreeMap;

use tracing::debug;

use crate::application::Application;
use crate::error::{CoreError, CoreResult};

/// Builds a fresh application. Applications live for one invocation, so the
/// registry hands out new instances rather than shared ones.
pub type ApplicationFactory = fn() -> Application;

struct Entry {
    description: String,
    factory: ApplicationFactory,
}

/// Maps application names to their factories.
#[derive(Default)]
pub struct ApplicationRegistry {
    applications: BTreeMap<String, Entry>,
}

impl ApplicationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application under the name it reports. A second
    /// registration with the same name replaces the first.
    pub fn register(&mut self, factory: ApplicationFactory) {
        let app = factory();
        debug!("Registering application: {}", app.name);
        self.applications.insert(
            app.name,
            Entry {
                description: app.description,
                factory,
            },
        );
    }

    /// Build an application by name.
    pub fn get(&self, name: &str) -> Option<Application> {
        self.applications.get(name).map(|entry| (entry.factory)())
    }

    /// Build an application by name, returning an error if not found.
    pub fn get_required(&self, name: &str) -> CoreResult<Application> {
        self.get(name)
            .ok_or_else(|| CoreError::ApplicationNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.applications.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.applications.keys().map(String::as_str).collect()
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.applications
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

impl std::fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRegistry")
            .field("applications", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use eksaddon_installer::InstallerDescriptor;
    use eksaddon_templates::TemplateSource;

    use super::*;
    use crate::apps::builtin_registry;
    use crate::options::ApplicationOptions;

    fn test_app() -> Application {
        Application::new(
            "test-app",
            "Test application",
            InstallerDescriptor::new(
                "https://charts.example.com",
                "test",
                "test",
                TemplateSource::yaml("values", "{}\n"),
            ),
            ApplicationOptions::new("test", "test", "0.1.0"),
        )
    }

    #[test]
    fn test_registry_register() {
        let mut registry = ApplicationRegistry::new();
        assert!(registry.is_empty());

        registry.register(test_app);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("test-app"));
        assert_eq!(registry.list(), vec![("test-app", "Test application")]);
    }

    #[test]
    fn test_registry_get() {
        let registry = builtin_registry();

        let app = registry.get("karpenter").unwrap();
        assert_eq!(app.name, "karpenter");
        assert!(registry.get("nonexistent").is_none());
        assert!(matches!(
            registry.get_required("nonexistent"),
            Err(CoreError::ApplicationNotFound(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn test_registry_names_sorted() {
        let mut registry = builtin_registry();
        registry.register(test_app);
        assert_eq!(registry.names(), vec!["karpenter", "test-app"]);
    }
}
