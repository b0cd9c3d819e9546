use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use meshframe_envelope::MessageSelector;

use crate::error::{BrokerError, Result};

/// Identifies one connected client for the lifetime of a broker. Ids are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Which clients want which messages.
#[derive(Debug)]
pub struct SubscriptionTable {
    routes: BTreeMap<MessageSelector, BTreeSet<ClientId>>,
    by_client: BTreeMap<ClientId, BTreeSet<MessageSelector>>,
    max_per_client: usize,
}

impl SubscriptionTable {
    pub fn new(max_per_client: usize) -> Self {
        Self {
            routes: BTreeMap::new(),
            by_client: BTreeMap::new(),
            max_per_client,
        }
    }

    /// Add `selectors` for `client` and return how many were new.
    ///
    /// The request is applied whole or not at all: if the new selectors
    /// would take the client past its limit nothing changes.
    pub fn subscribe(&mut self, client: ClientId, selectors: &[MessageSelector]) -> Result<usize> {
        let held = self.by_client.get(&client);
        let fresh: BTreeSet<MessageSelector> = selectors
            .iter()
            .copied()
            .filter(|selector| held.is_none_or(|set| !set.contains(selector)))
            .collect();
        let held_count = held.map_or(0, BTreeSet::len);
        if held_count + fresh.len() > self.max_per_client {
            return Err(BrokerError::SubscriptionLimit {
                client,
                max: self.max_per_client,
            });
        }

        for selector in &fresh {
            self.routes.entry(*selector).or_default().insert(client);
        }
        let added = fresh.len();
        if added > 0 {
            self.by_client.entry(client).or_default().extend(fresh);
        }
        Ok(added)
    }

    /// Remove `selectors` for `client` and return how many were held.
    pub fn unsubscribe(&mut self, client: ClientId, selectors: &[MessageSelector]) -> usize {
        let Some(held) = self.by_client.get_mut(&client) else {
            return 0;
        };
        let mut removed = 0;
        for selector in selectors {
            if held.remove(selector) {
                removed += 1;
                remove_route(&mut self.routes, *selector, client);
            }
        }
        if held.is_empty() {
            self.by_client.remove(&client);
        }
        removed
    }

    /// Forget every subscription of `client`.
    pub fn drop_client(&mut self, client: ClientId) -> usize {
        let Some(held) = self.by_client.remove(&client) else {
            return 0;
        };
        for selector in &held {
            remove_route(&mut self.routes, *selector, client);
        }
        held.len()
    }

    pub fn subscribers(&self, selector: MessageSelector) -> impl Iterator<Item = ClientId> + '_ {
        self.routes.get(&selector).into_iter().flatten().copied()
    }

    /// Subscribers of `selector` other than `sender`.
    pub fn recipients(&self, selector: MessageSelector, sender: ClientId) -> Vec<ClientId> {
        self.subscribers(selector)
            .filter(|client| *client != sender)
            .collect()
    }

    pub fn selectors_of(&self, client: ClientId) -> impl Iterator<Item = MessageSelector> + '_ {
        self.by_client.get(&client).into_iter().flatten().copied()
    }

    /// Number of clients holding at least one subscription.
    pub fn client_count(&self) -> usize {
        self.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn remove_route(
    routes: &mut BTreeMap<MessageSelector, BTreeSet<ClientId>>,
    selector: MessageSelector,
    client: ClientId,
) {
    if let Some(clients) = routes.get_mut(&selector) {
        clients.remove(&client);
        if clients.is_empty() {
            routes.remove(&selector);
        }
    }
}
