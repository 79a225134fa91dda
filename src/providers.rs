//! Interfaces to collaborators outside the composition core.
//!
//! The core only needs to know who is acting (for audit fields) and what a
//! component type's template defaults are. Authentication and template
//! authoring live elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{empty_document, ComponentDocuments};

/// Supplies the "current user" stamped on audit fields.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> String;
}

/// A fixed identity, e.g. the system account or a user resolved per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(pub String);

impl StaticIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> String {
        self.0.clone()
    }
}

/// Default documents and schema for one component type.
///
/// The schema is carried through untouched; its shape is assumed valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentTemplate {
    pub component_type: String,
    #[serde(default)]
    pub default_properties: Option<Value>,
    #[serde(default)]
    pub default_styles: Option<Value>,
    #[serde(default)]
    pub default_settings: Option<Value>,
    #[serde(default)]
    pub schema: Option<Value>,
}

impl ComponentTemplate {
    /// Fill the top-level fields the caller left out with template defaults.
    pub fn apply_defaults(&self, documents: &mut ComponentDocuments) {
        merge_defaults(&mut documents.properties, self.default_properties.as_ref());
        merge_defaults(&mut documents.styles, self.default_styles.as_ref());
        merge_defaults(&mut documents.settings, self.default_settings.as_ref());
    }
}

fn merge_defaults(target: &mut Value, defaults: Option<&Value>) {
    let Some(Value::Object(defaults)) = defaults else {
        return;
    };
    if !target.is_object() {
        *target = empty_document();
    }
    if let Value::Object(target) = target {
        for (field, value) in defaults {
            target.entry(field.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Looks up component templates by type.
pub trait TemplateCatalog: Send + Sync {
    /// `None` means the type is unknown and cannot be created.
    fn template(&self, component_type: &str) -> Option<ComponentTemplate>;
}

/// Accepts every component type and supplies no defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCatalog;

impl TemplateCatalog for OpenCatalog {
    fn template(&self, component_type: &str) -> Option<ComponentTemplate> {
        Some(ComponentTemplate {
            component_type: component_type.to_string(),
            ..ComponentTemplate::default()
        })
    }
}

/// A fixed set of templates; any other type is rejected.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    templates: HashMap<String, ComponentTemplate>,
}

impl InMemoryCatalog {
    pub fn new(templates: impl IntoIterator<Item = ComponentTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.component_type.clone(), t))
                .collect(),
        }
    }

    pub fn insert(&mut self, template: ComponentTemplate) {
        self.templates
            .insert(template.component_type.clone(), template);
    }
}

impl TemplateCatalog for InMemoryCatalog {
    fn template(&self, component_type: &str) -> Option<ComponentTemplate> {
        self.templates.get(component_type).cloned()
    }
}

/// The collaborators handed to the store.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub templates: Arc<dyn TemplateCatalog>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            identity: Arc::new(StaticIdentity::system()),
            templates: Arc::new(OpenCatalog),
        }
    }
}
