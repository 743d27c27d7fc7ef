//! Built-in applications.

pub mod karpenter;

use crate::registry::ApplicationRegistry;

/// A registry holding every built-in application.
pub fn builtin_registry() -> ApplicationRegistry {
    let mut registry = ApplicationRegistry::new();
    registry.register(karpenter::application);
    registry
}
