use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Runtime provider the bundled catalogs target
pub const DEFAULT_RUNTIME_PROVIDER: &str = "quarkus";

/// `CamelCatalog` Custom Resource: the component catalog for one runtime version
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "camel.apache.org", version = "v1", kind = "CamelCatalog")]
#[kube(namespaced)]
#[kube(shortname = "cc")]
#[kube(printcolumn = r#"{"name":"Runtime version","type":"string","jsonPath":".spec.runtime.version"}"#)]
#[kube(printcolumn = r#"{"name":"Runtime provider","type":"string","jsonPath":".spec.runtime.provider"}"#)]
pub struct CamelCatalogSpec {
    pub runtime: RuntimeSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    pub version: String,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_class: Option<String>,
}

fn default_provider() -> String {
    DEFAULT_RUNTIME_PROVIDER.to_string()
}

/// Resource name of the catalog for a runtime version.
#[must_use]
pub fn catalog_name(runtime_version: &str) -> String {
    format!("camel-catalog-{}", runtime_version.to_lowercase())
}

impl CamelCatalog {
    #[must_use]
    pub fn for_runtime(runtime_version: &str) -> Self {
        CamelCatalog::new(
            &catalog_name(runtime_version),
            CamelCatalogSpec {
                runtime: RuntimeSpec {
                    version: runtime_version.to_string(),
                    provider: default_provider(),
                    application_class: Some("io.quarkus.bootstrap.runner.QuarkusEntryPoint".to_string()),
                },
            },
        )
    }
}
