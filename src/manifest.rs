//! Module manifests — typed descriptors, structural validation, schema defaults.
//!
//! A manifest is the static description of a discoverable module: identity,
//! capabilities, dependencies and config schema. Validation here is purely
//! structural; config *values* are checked by the resolver at resolve time.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::types::{Error, Result};

/// Capability a module can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Tool,
    Service,
}

/// Which catalog a manifest was discovered in. The capability set must
/// match the catalog: a manifest under `tools/` may only provide a tool,
/// one under `modules/` must provide both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    Tools,
    Services,
    Paired,
}

impl Catalog {
    /// Directory name under the modules root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Catalog::Tools => "tools",
            Catalog::Services => "services",
            Catalog::Paired => "modules",
        }
    }

    /// Check the capability set against this catalog.
    pub fn allows(self, provides: &[Capability]) -> bool {
        let has_tool = provides.contains(&Capability::Tool);
        let has_service = provides.contains(&Capability::Service);
        match self {
            Catalog::Tools => has_tool && !has_service,
            Catalog::Services => has_service && !has_tool,
            Catalog::Paired => has_tool && has_service,
        }
    }

    pub fn all() -> [Catalog; 3] {
        [Catalog::Tools, Catalog::Services, Catalog::Paired]
    }
}

/// Config schema declared by a manifest (JSON-Schema-shaped subset:
/// type / properties / required, with per-property `default` values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,

    #[serde(default)]
    pub properties: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

fn default_schema_type() -> String {
    "object".to_string()
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }
}

impl ConfigSchema {
    /// Extract declared per-field defaults as a flat object.
    pub fn defaults(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (field, spec) in &self.properties {
            if let Some(default) = spec.get("default") {
                out.insert(field.clone(), default.clone());
            }
        }
        out
    }

    /// Whether the schema declares the given property at all.
    pub fn declares(&self, field: &str) -> bool {
        self.properties.contains_key(field)
    }

    /// Render as a JSON Schema document for the `jsonschema` validator.
    pub fn to_json_schema(&self) -> Value {
        json!({
            "type": self.schema_type,
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// Static descriptor of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,

    /// Capability set; at least one of tool/service.
    pub provides: Vec<Capability>,

    /// Names of modules whose services must be running first.
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub config_schema: ConfigSchema,

    /// Whether the module's tool surface is advertised to clients.
    #[serde(default = "default_advertise")]
    pub advertise: bool,

    #[serde(default)]
    pub description: String,
}

fn default_advertise() -> bool {
    true
}

impl ModuleManifest {
    /// Parse a manifest from JSON text.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::validation(format!("bad manifest: {e}")))
    }

    /// Structural validation against the catalog the manifest came from.
    pub fn validate(&self, catalog: Catalog) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("manifest name cannot be empty"));
        }
        if self.version.is_empty() {
            return Err(Error::validation(format!(
                "manifest '{}': version cannot be empty",
                self.name
            )));
        }
        if self.provides.is_empty() {
            return Err(Error::validation(format!(
                "manifest '{}': must provide at least one capability",
                self.name
            )));
        }
        if !catalog.allows(&self.provides) {
            return Err(Error::validation(format!(
                "manifest '{}': capability set {:?} not allowed in catalog '{}'",
                self.name,
                self.provides,
                catalog.dir_name()
            )));
        }
        Ok(())
    }

    pub fn provides_service(&self) -> bool {
        self.provides.contains(&Capability::Service)
    }

    pub fn provides_tool(&self) -> bool {
        self.provides.contains(&Capability::Tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(provides: Vec<Capability>) -> ModuleManifest {
        ModuleManifest {
            name: "calc".to_string(),
            version: "1.0.0".to_string(),
            provides,
            dependencies: vec![],
            config_schema: ConfigSchema::default(),
            advertise: true,
            description: String::new(),
        }
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let m = ModuleManifest::parse(
            r#"{ "name": "calc", "version": "1.0.0", "provides": ["tool"] }"#,
        )
        .unwrap();
        assert_eq!(m.name, "calc");
        assert!(m.advertise);
        assert!(m.dependencies.is_empty());
        assert!(m.provides_tool());
        assert!(!m.provides_service());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut m = manifest(vec![Capability::Tool]);
        m.name = String::new();
        assert!(m.validate(Catalog::Tools).is_err());

        let mut m = manifest(vec![Capability::Tool]);
        m.version = String::new();
        assert!(m.validate(Catalog::Tools).is_err());

        let m = manifest(vec![]);
        assert!(m.validate(Catalog::Tools).is_err());
    }

    #[test]
    fn test_catalog_capability_match() {
        assert!(manifest(vec![Capability::Tool])
            .validate(Catalog::Tools)
            .is_ok());
        assert!(manifest(vec![Capability::Service])
            .validate(Catalog::Services)
            .is_ok());
        assert!(manifest(vec![Capability::Tool, Capability::Service])
            .validate(Catalog::Paired)
            .is_ok());

        // Mismatches
        assert!(manifest(vec![Capability::Service])
            .validate(Catalog::Tools)
            .is_err());
        assert!(manifest(vec![Capability::Tool])
            .validate(Catalog::Paired)
            .is_err());
        assert!(manifest(vec![Capability::Tool, Capability::Service])
            .validate(Catalog::Services)
            .is_err());
    }

    #[test]
    fn test_schema_defaults_extraction() {
        let schema: ConfigSchema = serde_json::from_value(serde_json::json!({
            "type": "object",
            "properties": {
                "max": { "type": "number", "default": 10 },
                "label": { "type": "string" }
            },
            "required": ["max"]
        }))
        .unwrap();

        let defaults = schema.defaults();
        assert_eq!(defaults.get("max"), Some(&serde_json::json!(10)));
        assert!(!defaults.contains_key("label"));
        assert!(schema.declares("label"));
        assert!(!schema.declares("lazy"));
    }
}
