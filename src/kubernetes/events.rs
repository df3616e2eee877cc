// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Namespace event delivery
//!
//! A kube watcher only reports the latest state of an object, so the translator
//! remembers what it saw last to turn watcher events into add/update/delete
//! notifications. Translated events travel over an mpsc channel to a single
//! consumer, which keeps per-namespace ordering intact. The channel is unbounded
//! so the reflector store keeps filling while the consumer waits for the
//! initial sync.

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher;
use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::filter::{DiscoveryNamespacesFilter, MembershipEvent};

/// A namespace lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceEvent {
    Added(Namespace),
    Updated { old: Namespace, new: Namespace },
    Deleted(Namespace),
}

impl NamespaceEvent {
    /// Name of the namespace the event is about
    pub fn name(&self) -> Option<&str> {
        let ns = match self {
            Self::Added(ns) | Self::Deleted(ns) => ns,
            Self::Updated { new, .. } => new,
        };
        ns.metadata.name.as_deref()
    }
}

/// Turns watcher events into [`NamespaceEvent`]s
#[derive(Debug, Default)]
pub struct EventTranslator {
    known: HashMap<String, Namespace>,
    /// Names seen during an in-progress relist
    relist: Option<HashSet<String>>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, event: watcher::Event<Namespace>) -> Vec<NamespaceEvent> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(ns) => {
                if let (Some(seen), Some(name)) = (self.relist.as_mut(), ns.metadata.name.as_ref())
                {
                    seen.insert(name.clone());
                }
                self.apply(ns).into_iter().collect()
            }
            watcher::Event::InitDone => self.finish_relist(),
            watcher::Event::Apply(ns) => self.apply(ns).into_iter().collect(),
            watcher::Event::Delete(ns) => {
                if let Some(name) = ns.metadata.name.as_ref() {
                    self.known.remove(name);
                }
                vec![NamespaceEvent::Deleted(ns)]
            }
        }
    }

    fn apply(&mut self, ns: Namespace) -> Option<NamespaceEvent> {
        let name = ns.metadata.name.clone()?;
        match self.known.insert(name, ns.clone()) {
            Some(old) => Some(NamespaceEvent::Updated { old, new: ns }),
            None => Some(NamespaceEvent::Added(ns)),
        }
    }

    /// Namespaces that vanished while the watch was down are reported as deleted
    fn finish_relist(&mut self) -> Vec<NamespaceEvent> {
        let Some(seen) = self.relist.take() else {
            return Vec::new();
        };

        let mut vanished: Vec<String> = self
            .known
            .keys()
            .filter(|name| !seen.contains(*name))
            .cloned()
            .collect();
        vanished.sort();

        if !vanished.is_empty() {
            debug!(count = vanished.len(), "Namespaces removed during relist");
        }

        vanished
            .into_iter()
            .filter_map(|name| self.known.remove(&name))
            .map(NamespaceEvent::Deleted)
            .collect()
    }
}

impl DiscoveryNamespacesFilter {
    /// Apply a namespace event and notify handlers of the resulting transition
    pub fn handle_event(&self, event: &NamespaceEvent) {
        let Some(name) = event.name() else {
            trace!("Ignoring namespace event without a name");
            return;
        };

        let transition = match event {
            NamespaceEvent::Added(ns) => self
                .namespace_created(&ns.metadata)
                .then_some(MembershipEvent::Added),
            NamespaceEvent::Updated { old, new } => {
                self.namespace_updated(&old.metadata, &new.metadata)
            }
            NamespaceEvent::Deleted(ns) => self
                .namespace_deleted(&ns.metadata)
                .then_some(MembershipEvent::Deleted),
        };

        if let Some(transition) = transition {
            debug!(namespace = %name, event = ?transition, "Discovery membership changed");
            self.notify_handlers(name, transition);
        }
    }
}

/// Translate a watcher stream and forward the results to `tx`
///
/// Returns when the stream ends or the receiver is dropped.
pub async fn forward_watch_events<S>(stream: S, tx: mpsc::UnboundedSender<NamespaceEvent>)
where
    S: Stream<Item = Result<watcher::Event<Namespace>, watcher::Error>>,
{
    let mut stream = pin!(stream);
    let mut translator = EventTranslator::new();

    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Namespace watch error, will retry");
                continue;
            }
        };

        for ns_event in translator.translate(event) {
            if tx.send(ns_event).is_err() {
                debug!("Namespace event receiver dropped, stopping watch forwarder");
                return;
            }
        }
    }

    warn!("Namespace watch stream ended");
}

/// Feed events from `rx` into the filter until the channel closes
pub async fn run_event_loop(
    filter: Arc<DiscoveryNamespacesFilter>,
    mut rx: mpsc::UnboundedReceiver<NamespaceEvent>,
) {
    info!("Processing namespace events");
    while let Some(event) = rx.recv().await {
        filter.handle_event(&event);
    }
    debug!("Namespace event channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::source::NamespaceSnapshot;
    use crate::kubernetes::source::tests::namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    fn prod_filter() -> Arc<DiscoveryNamespacesFilter> {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("env".to_string(), "prod".to_string())])),
            ..Default::default()
        };
        Arc::new(
            DiscoveryNamespacesFilter::new(Arc::new(NamespaceSnapshot::new()), &[selector])
                .unwrap(),
        )
    }

    fn record(filter: &DiscoveryNamespacesFilter) -> Arc<Mutex<Vec<(String, MembershipEvent)>>> {
        let events: Arc<Mutex<Vec<(String, MembershipEvent)>>> = Arc::default();
        let sink = Arc::clone(&events);
        filter.add_handler(move |ns, event| sink.lock().push((ns.to_string(), event)));
        events
    }

    fn kinds(events: &[NamespaceEvent]) -> Vec<(&'static str, &str)> {
        events
            .iter()
            .map(|e| {
                let kind = match e {
                    NamespaceEvent::Added(_) => "added",
                    NamespaceEvent::Updated { .. } => "updated",
                    NamespaceEvent::Deleted(_) => "deleted",
                };
                (kind, e.name().unwrap_or_default())
            })
            .collect()
    }

    #[test]
    fn test_translate_apply_then_update() {
        let mut translator = EventTranslator::new();

        let first = translator.translate(watcher::Event::Apply(namespace("a", &[])));
        assert_eq!(kinds(&first), vec![("added", "a")]);

        let second = translator.translate(watcher::Event::Apply(namespace("a", &[("env", "prod")])));
        assert_eq!(kinds(&second), vec![("updated", "a")]);
        match &second[0] {
            NamespaceEvent::Updated { old, new } => {
                assert!(old.metadata.labels.as_ref().unwrap().is_empty());
                assert_eq!(new.metadata.labels.as_ref().unwrap()["env"], "prod");
            }
            other => panic!("Expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_translate_delete() {
        let mut translator = EventTranslator::new();
        translator.translate(watcher::Event::Apply(namespace("a", &[])));

        let deleted = translator.translate(watcher::Event::Delete(namespace("a", &[])));
        assert_eq!(kinds(&deleted), vec![("deleted", "a")]);

        // Re-adding after delete is a fresh add
        let again = translator.translate(watcher::Event::Apply(namespace("a", &[])));
        assert_eq!(kinds(&again), vec![("added", "a")]);
    }

    #[test]
    fn test_translate_relist_drops_vanished() {
        let mut translator = EventTranslator::new();
        for name in ["a", "b", "c"] {
            translator.translate(watcher::Event::Apply(namespace(name, &[])));
        }

        assert!(translator.translate(watcher::Event::Init).is_empty());
        let applied = translator.translate(watcher::Event::InitApply(namespace("b", &[])));
        assert_eq!(kinds(&applied), vec![("updated", "b")]);
        let applied = translator.translate(watcher::Event::InitApply(namespace("d", &[])));
        assert_eq!(kinds(&applied), vec![("added", "d")]);

        let done = translator.translate(watcher::Event::InitDone);
        assert_eq!(kinds(&done), vec![("deleted", "a"), ("deleted", "c")]);

        // A stray InitDone without Init does nothing
        assert!(translator.translate(watcher::Event::InitDone).is_empty());
    }

    #[test]
    fn test_translate_ignores_unnamed() {
        let mut translator = EventTranslator::new();
        assert!(
            translator
                .translate(watcher::Event::Apply(Namespace::default()))
                .is_empty()
        );
    }

    #[test]
    fn test_handle_event_notifies_transitions() {
        let filter = prod_filter();
        let events = record(&filter);

        filter.handle_event(&NamespaceEvent::Added(namespace("ns1", &[("env", "prod")])));
        filter.handle_event(&NamespaceEvent::Added(namespace("ns2", &[("env", "dev")])));
        filter.handle_event(&NamespaceEvent::Updated {
            old: namespace("ns1", &[("env", "prod")]),
            new: namespace("ns1", &[("env", "prod"), ("team", "a")]),
        });
        filter.handle_event(&NamespaceEvent::Updated {
            old: namespace("ns2", &[("env", "dev")]),
            new: namespace("ns2", &[("env", "prod")]),
        });
        filter.handle_event(&NamespaceEvent::Updated {
            old: namespace("ns1", &[("env", "prod")]),
            new: namespace("ns1", &[("env", "dev")]),
        });
        filter.handle_event(&NamespaceEvent::Deleted(namespace("ns2", &[("env", "prod")])));
        filter.handle_event(&NamespaceEvent::Deleted(namespace("ns1", &[("env", "dev")])));

        assert_eq!(
            *events.lock(),
            vec![
                ("ns1".to_string(), MembershipEvent::Added),
                ("ns2".to_string(), MembershipEvent::Added),
                ("ns1".to_string(), MembershipEvent::Deleted),
                ("ns2".to_string(), MembershipEvent::Deleted),
            ]
        );
        assert!(filter.get_members().is_empty());
    }

    #[tokio::test]
    async fn test_forward_and_process_events() {
        let filter = prod_filter();
        let events = record(&filter);
        let (tx, rx) = mpsc::unbounded_channel();

        let items: Vec<Result<watcher::Event<Namespace>, watcher::Error>> = vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(namespace("prod-a", &[("env", "prod")]))),
            Ok(watcher::Event::InitApply(namespace("dev-a", &[("env", "dev")]))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(namespace("dev-a", &[("env", "prod")]))),
            Ok(watcher::Event::Delete(namespace("prod-a", &[("env", "prod")]))),
        ];
        let watch = futures::stream::iter(items);

        forward_watch_events(watch, tx).await;
        // Sender dropped after forwarding, so the loop ends once drained
        run_event_loop(Arc::clone(&filter), rx).await;

        assert_eq!(
            *events.lock(),
            vec![
                ("prod-a".to_string(), MembershipEvent::Added),
                ("dev-a".to_string(), MembershipEvent::Added),
                ("prod-a".to_string(), MembershipEvent::Deleted),
            ]
        );
        let members: Vec<String> = filter.get_members().into_iter().collect();
        assert_eq!(members, vec!["dev-a"]);
    }
}
