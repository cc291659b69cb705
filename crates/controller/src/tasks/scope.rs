//! Which resources this operator instance is responsible for.

use crate::tasks::config::{OperatorConfig, DEFAULT_OPERATOR_ID};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Identity and watch scope of the running operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorScope {
    pub id: String,
    /// Namespace the operator runs in
    pub namespace: String,
    /// `None` for a global operator
    pub watch_namespace: Option<String>,
}

impl OperatorScope {
    #[must_use]
    pub fn new(id: &str, namespace: &str, watch_namespace: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            namespace: namespace.to_string(),
            watch_namespace: watch_namespace.map(str::to_string),
        }
    }

    #[must_use]
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(
            &config.id,
            &config.namespace,
            config.watch_namespace.as_deref(),
        )
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.watch_namespace.is_none()
    }

    #[must_use]
    pub fn is_default_operator(&self) -> bool {
        self.id == DEFAULT_OPERATOR_ID
    }

    /// Whether a resource carrying `operator_id` belongs to this operator.
    ///
    /// Unannotated resources are picked up by the default operator and by any
    /// namespaced operator, which has nobody to compete with in its namespace.
    #[must_use]
    pub fn handles(&self, operator_id: Option<&str>) -> bool {
        match operator_id {
            Some(id) if !id.is_empty() => id == self.id,
            _ => self.is_default_operator() || !self.is_global(),
        }
    }

    /// Api spanning the watch scope: one namespace, or the whole cluster.
    pub fn api<K>(&self, client: Client) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotated_resources_need_an_exact_match() {
        let scope = OperatorScope::new("camel-k", "camel-k", None);
        assert!(scope.handles(Some("camel-k")));
        assert!(!scope.handles(Some("camel-k-2")));
    }

    #[test]
    fn unannotated_resources_go_to_default_or_local_operators() {
        let default_global = OperatorScope::new("camel-k", "camel-k", None);
        assert!(default_global.handles(None));
        assert!(default_global.handles(Some("")));

        let custom_global = OperatorScope::new("camel-k-2", "camel-k", None);
        assert!(!custom_global.handles(None));

        let custom_local = OperatorScope::new("camel-k-2", "team-a", Some("team-a"));
        assert!(custom_local.handles(None));
        assert!(!custom_local.is_global());
    }
}
