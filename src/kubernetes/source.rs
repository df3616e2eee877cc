// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Sources of the full namespace list
//!
//! The discovery filter only needs a cheap, non-blocking way to list every known
//! namespace. In the daemon this is the reflector store; for one-shot commands and
//! tests it is an in-memory [`NamespaceSnapshot`].

use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::Store;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Supplies the current list of namespaces
pub trait NamespaceSource: Send + Sync {
    /// Return every namespace currently known. Must not block on I/O.
    fn list(&self) -> Vec<Arc<Namespace>>;
}

impl NamespaceSource for Store<Namespace> {
    fn list(&self) -> Vec<Arc<Namespace>> {
        self.state()
    }
}

/// In-memory namespace list keyed by name
#[derive(Debug, Default)]
pub struct NamespaceSnapshot {
    namespaces: RwLock<BTreeMap<String, Arc<Namespace>>>,
}

impl NamespaceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a namespace. Namespaces without a name are ignored.
    pub fn insert(&self, ns: Namespace) {
        if let Some(name) = ns.metadata.name.clone() {
            self.namespaces.write().insert(name, Arc::new(ns));
        }
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.namespaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.read().is_empty()
    }
}

impl FromIterator<Namespace> for NamespaceSnapshot {
    fn from_iter<I: IntoIterator<Item = Namespace>>(iter: I) -> Self {
        let snapshot = Self::new();
        for ns in iter {
            snapshot.insert(ns);
        }
        snapshot
    }
}

impl NamespaceSource for NamespaceSnapshot {
    fn list(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.read().values().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher;

    /// Build a namespace with the given labels
    pub(crate) fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn names(source: &dyn NamespaceSource) -> Vec<String> {
        let mut names: Vec<String> = source
            .list()
            .iter()
            .filter_map(|ns| ns.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_snapshot_insert_and_remove() {
        let snapshot = NamespaceSnapshot::new();
        assert!(snapshot.is_empty());

        snapshot.insert(namespace("a", &[]));
        snapshot.insert(namespace("b", &[]));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(names(&snapshot), vec!["a", "b"]);

        assert!(snapshot.remove("a").is_some());
        assert!(snapshot.remove("a").is_none());
        assert_eq!(names(&snapshot), vec!["b"]);
    }

    #[test]
    fn test_snapshot_replaces_by_name() {
        let snapshot: NamespaceSnapshot = [namespace("a", &[("env", "dev")])].into_iter().collect();
        snapshot.insert(namespace("a", &[("env", "prod")]));

        let listed = snapshot.list();
        assert_eq!(listed.len(), 1);
        let labels = listed[0].metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_snapshot_ignores_unnamed() {
        let snapshot = NamespaceSnapshot::new();
        snapshot.insert(Namespace::default());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_reflector_store_source() {
        let mut writer: Writer<Namespace> = Writer::default();
        writer.apply_watcher_event(&watcher::Event::Apply(namespace("istio-system", &[])));
        writer.apply_watcher_event(&watcher::Event::Apply(namespace("default", &[])));
        let store = writer.as_reader();

        assert_eq!(names(&store), vec!["default", "istio-system"]);
    }
}
