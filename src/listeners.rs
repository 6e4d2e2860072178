// listeners.rs - Event listeners contributed by enabled modules
// Per event kind an ordered list of hooks; fan-out runs them in
// registration order and isolates failures (see GuildSession::emit).

use std::collections::HashMap;

use crate::events::EventKind;
use crate::module::EventFn;

#[derive(Clone)]
pub struct Listener {
    pub module_id: String,
    pub handler: EventFn,
}

#[derive(Default)]
pub struct ListenerRegistry {
    by_kind: HashMap<EventKind, Vec<Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EventKind, module_id: &str, handler: EventFn) {
        self.by_kind.entry(kind).or_default().push(Listener {
            module_id: module_id.to_string(),
            handler,
        });
    }

    /// Drops every listener `module_id` registered; returns how many went away
    pub fn remove_module(&mut self, module_id: &str) -> usize {
        let mut removed = 0;
        for listeners in self.by_kind.values_mut() {
            let before = listeners.len();
            listeners.retain(|l| l.module_id != module_id);
            removed += before - listeners.len();
        }
        self.by_kind.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    /// Snapshot of the listeners for `kind`, so hooks may re-enter the session
    pub fn listeners_for(&self, kind: EventKind) -> Vec<Listener> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    /// (kind, owner) pairs in registration order, sorted by kind
    pub fn signature(&self) -> Vec<(EventKind, String)> {
        let mut kinds: Vec<&EventKind> = self.by_kind.keys().collect();
        kinds.sort();
        kinds
            .into_iter()
            .flat_map(|kind| {
                self.by_kind[kind]
                    .iter()
                    .map(move |l| (*kind, l.module_id.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
