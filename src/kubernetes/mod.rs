mod client;
pub mod events;
pub mod filter;
pub mod selector;
pub mod source;

pub use client::{create_client, list_namespaces, watch_namespaces};
pub use events::{EventTranslator, NamespaceEvent, run_event_loop};
pub use filter::{DiscoveryNamespacesFilter, FilterTarget, MembershipEvent};
pub use selector::{SelectorError, SelectorSet};
pub use source::{NamespaceSnapshot, NamespaceSource};
