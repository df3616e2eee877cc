// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Discovery namespace filter
//!
//! Tracks the set of namespaces selected for discovery and exposes a filter used
//! to drop objects that live outside of those namespaces.
//!
//! Membership is driven from two directions:
//! - Namespace add/update/delete events (see [`super::events`])
//! - Wholesale replacement of the discovery selectors on config reload
//!
//! Selectors and members live behind a single lock and are always swapped
//! together, so readers never observe selectors from one generation and members
//! from another. Handlers registered with [`DiscoveryNamespacesFilter::add_handler`]
//! are told about every namespace that enters or leaves the set.

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::Resource;
use kube::api::DynamicObject;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::selector::{SelectorError, SelectorSet};
use super::source::NamespaceSource;

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();

/// Membership transition reported to handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipEvent {
    /// Namespace became selected for discovery
    Added,
    /// Namespace is no longer selected for discovery
    Deleted,
}

/// Callback invoked on membership transitions
pub type NamespaceHandler = Box<dyn Fn(&str, MembershipEvent) + Send + Sync>;

/// What to test with [`DiscoveryNamespacesFilter::filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget<'a> {
    /// A bare namespace name
    Name(&'a str),
    /// An object living in `namespace`. For Namespace objects this is their own name.
    Object { namespace: &'a str },
    /// An object whose identity can't be recovered (e.g. a deletion tombstone)
    Unresolved,
}

impl<'a> FilterTarget<'a> {
    /// Build a target from a typed Kubernetes resource
    pub fn resource<K>(obj: &'a K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        let is_namespace = K::group(&()).is_empty() && K::kind(&()) == "Namespace";
        Self::from_meta(obj.meta(), is_namespace)
    }

    fn from_meta(meta: &'a ObjectMeta, is_namespace: bool) -> Self {
        let Some(name) = meta.name.as_deref() else {
            return Self::Unresolved;
        };
        let namespace = if is_namespace {
            name
        } else {
            meta.namespace.as_deref().unwrap_or_default()
        };
        Self::Object { namespace }
    }
}

impl<'a> From<&'a str> for FilterTarget<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for FilterTarget<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name.as_str())
    }
}

impl<'a> From<&'a Namespace> for FilterTarget<'a> {
    fn from(ns: &'a Namespace) -> Self {
        Self::resource(ns)
    }
}

impl<'a> From<&'a DynamicObject> for FilterTarget<'a> {
    fn from(obj: &'a DynamicObject) -> Self {
        let is_namespace = obj
            .types
            .as_ref()
            .is_some_and(|t| t.kind == "Namespace" && t.api_version == "v1");
        Self::from_meta(&obj.metadata, is_namespace)
    }
}

/// Selectors and the members they produce, swapped as one unit
#[derive(Debug, Default)]
struct FilterState {
    selectors: SelectorSet,
    members: HashSet<String>,
}

impl FilterState {
    fn contains(&self, namespace: &str) -> bool {
        self.members.contains(namespace)
    }
}

/// Tracks the namespaces selected for discovery
///
/// Shared between consumers as `Arc<DiscoveryNamespacesFilter>`.
pub struct DiscoveryNamespacesFilter {
    source: Arc<dyn NamespaceSource>,
    state: RwLock<FilterState>,
    handlers: RwLock<Vec<NamespaceHandler>>,
}

impl DiscoveryNamespacesFilter {
    /// Create a filter with the initial discovery selectors
    ///
    /// Membership is computed from `source` right away; no handlers exist yet, so
    /// nothing is notified.
    pub fn new(
        source: Arc<dyn NamespaceSource>,
        selectors: &[LabelSelector],
    ) -> Result<Self, SelectorError> {
        let selectors = SelectorSet::compile(selectors)?;
        let members = select_members(&selectors, source.as_ref());
        debug!(
            selectors = %selectors,
            members = members.len(),
            "Initialized discovery namespaces filter"
        );

        Ok(Self {
            source,
            state: RwLock::new(FilterState { selectors, members }),
            handlers: RwLock::new(Vec::new()),
        })
    }

    /// Check whether an object or namespace name is in a namespace selected for discovery
    pub fn filter<'a>(&self, target: impl Into<FilterTarget<'a>>) -> bool {
        let state = self.state.read();
        // No selectors means everything is discoverable
        if state.selectors.is_empty() {
            return true;
        }

        match target.into() {
            FilterTarget::Name(namespace) | FilterTarget::Object { namespace } => {
                state.contains(namespace)
            }
            FilterTarget::Unresolved => false,
        }
    }

    /// Check whether a namespace with these labels is selected by the current selectors
    pub fn filter_namespace(&self, labels: &BTreeMap<String, String>) -> bool {
        self.state.read().selectors.matches(labels)
    }

    /// Replace the discovery selectors, notifying handlers of every namespace that
    /// enters or leaves the member set
    ///
    /// A malformed selector aborts the update and leaves the previous selectors and
    /// members in place.
    pub fn selectors_changed(&self, specs: &[LabelSelector]) -> Result<(), SelectorError> {
        let selectors = match SelectorSet::compile(specs) {
            Ok(selectors) => selectors,
            Err(e) => {
                error!(error = %e, "Invalid discovery selector, keeping previous selectors");
                return Err(e);
            }
        };

        let mut state = self.state.write();
        let members = select_members(&selectors, self.source.as_ref());

        let mut added: Vec<&String> = members.difference(&state.members).collect();
        let mut deleted: Vec<&String> = state.members.difference(&members).collect();
        added.sort();
        deleted.sort();

        {
            let handlers = self.handlers.read();
            for ns in &added {
                notify(&handlers, ns, MembershipEvent::Added);
            }
            for ns in &deleted {
                notify(&handlers, ns, MembershipEvent::Deleted);
            }
        }

        info!(
            selectors = %selectors,
            added = added.len(),
            deleted = deleted.len(),
            members = members.len(),
            "Discovery selectors changed"
        );

        state.selectors = selectors;
        state.members = members;
        Ok(())
    }

    /// Recompute members from the current selectors without notifying handlers
    ///
    /// Meant to run once after the namespace source has synced and before events
    /// are dispatched. Returns the number of members.
    pub fn sync_namespaces(&self) -> usize {
        let mut state = self.state.write();
        let members = select_members(&state.selectors, self.source.as_ref());
        state.members = members;
        debug!(members = state.members.len(), "Synced discovery namespaces");
        state.members.len()
    }

    /// Record a created namespace
    ///
    /// Returns true if it became a member. Handlers are not notified here.
    pub fn namespace_created(&self, ns: &ObjectMeta) -> bool {
        let Some(name) = ns.name.as_deref() else {
            return false;
        };
        let mut state = self.state.write();
        state.selectors.matches(labels_of(ns)) && state.members.insert(name.to_string())
    }

    /// Record an updated namespace
    ///
    /// Returns the membership transition caused by the update, if any. The new
    /// object's name is authoritative.
    pub fn namespace_updated(
        &self,
        old: &ObjectMeta,
        new: &ObjectMeta,
    ) -> Option<MembershipEvent> {
        let name = new.name.as_deref()?;
        if old.name.as_deref() != Some(name) {
            warn!(
                old = ?old.name,
                new = %name,
                "Namespace name changed between updates, tracking new name"
            );
        }

        let mut state = self.state.write();
        let was_member = state.contains(name);
        let selected = state.selectors.matches(labels_of(new));

        match (was_member, selected) {
            (true, false) => {
                state.members.remove(name);
                Some(MembershipEvent::Deleted)
            }
            (false, true) => {
                state.members.insert(name.to_string());
                Some(MembershipEvent::Added)
            }
            _ => None,
        }
    }

    /// Record a deleted namespace
    ///
    /// Returns true if it was a member. Objects inside the namespace are not
    /// notified; their own delete events cover them.
    pub fn namespace_deleted(&self, ns: &ObjectMeta) -> bool {
        ns.name
            .as_deref()
            .is_some_and(|name| self.state.write().members.remove(name))
    }

    /// Snapshot of the namespaces currently selected for discovery
    pub fn get_members(&self) -> HashSet<String> {
        self.state.read().members.clone()
    }

    /// Register a handler for membership transitions
    pub fn add_handler<F>(&self, f: F)
    where
        F: Fn(&str, MembershipEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Box::new(f));
    }

    /// Invoke every handler for one transition
    pub fn notify_handlers(&self, namespace: &str, event: MembershipEvent) {
        notify(&self.handlers.read(), namespace, event);
    }
}

fn notify(handlers: &[NamespaceHandler], namespace: &str, event: MembershipEvent) {
    for handler in handlers {
        handler(namespace, event);
    }
}

fn labels_of(meta: &ObjectMeta) -> &BTreeMap<String, String> {
    meta.labels.as_ref().unwrap_or(&NO_LABELS)
}

/// Evaluate every namespace from `source` exactly once against `selectors`
fn select_members(selectors: &SelectorSet, source: &dyn NamespaceSource) -> HashSet<String> {
    source
        .list()
        .iter()
        .filter(|ns| selectors.matches(labels_of(&ns.metadata)))
        .filter_map(|ns| ns.metadata.name.clone())
        .collect()
}
