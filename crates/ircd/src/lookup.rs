//! Case-insensitive lookup structures: the clients index, the channels
//! index and the fixed-capacity who-was history ring.

use dashmap::DashMap;
use std::sync::Arc;

use crate::channel::Channel;
use crate::client::{ClientId, ClientRef};
use crate::names::{Name, fold};

/// Clients by folded nick. A nick is claimed here from the first NICK
/// command on, registered or not, which keeps the folded-nick mapping
/// injective.
#[derive(Default)]
pub struct ClientLookupSet {
    by_nick: DashMap<String, ClientRef>,
}

impl ClientLookupSet {
    pub fn new() -> Self {
        ClientLookupSet { by_nick: DashMap::new() }
    }

    pub fn get(&self, nick: &str) -> Option<ClientRef> {
        self.by_nick.get(&fold(nick)).map(|entry| entry.value().clone())
    }

    pub fn add(&self, nick: &Name, client: ClientRef) {
        self.by_nick.insert(fold(nick.display()), client);
    }

    /// Remove `nick` only while it still maps to `id`; a later claimant of
    /// the same nick is left alone.
    pub fn remove(&self, nick: &Name, id: ClientId) {
        self.by_nick.remove_if(&fold(nick.display()), |_, client| client.id == id);
    }

    pub fn rename(&self, old: &Name, new: &Name, client: ClientRef) {
        self.remove(old, client.id);
        self.add(new, client);
    }

    pub fn count(&self) -> usize {
        self.by_nick.len()
    }

    pub fn all(&self) -> Vec<ClientRef> {
        self.by_nick.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Registered clients whose nick, username or shown host matches the
    /// glob mask.
    pub async fn find_all(&self, mask: &Name) -> Vec<ClientRef> {
        let mut matches = Vec::new();
        for client in self.all() {
            let state = client.state.read().await;
            if !state.registered {
                continue;
            }
            let nick_matches =
                state.nick.as_ref().is_some_and(|nick| mask.matches(nick.display()));
            if nick_matches || mask.matches(&state.username) || mask.matches(state.shown_host()) {
                drop(state);
                matches.push(client);
            }
        }
        matches
    }
}

/// Channels by folded name.
#[derive(Default)]
pub struct ChannelNameMap {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelNameMap {
    pub fn new() -> Self {
        ChannelNameMap { channels: DashMap::new() }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(&fold(name)).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, name: &Name) -> Arc<Channel> {
        self.channels
            .entry(fold(name.display()))
            .or_insert_with(|| Arc::new(Channel::new(name.clone())))
            .value()
            .clone()
    }

    pub fn remove(&self, name: &Name) {
        self.channels.remove(&fold(name.display()));
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Snapshot of a nick taken when it was abandoned.
#[derive(Debug, Clone)]
pub struct WhoWas {
    pub nickname: Name,
    pub username: String,
    pub hostname: String,
    pub hostmask: String,
    pub realname: String,
}

/// Fixed-capacity ring of who-was snapshots; the oldest entries are
/// overwritten. Append is O(1), lookup walks newest-first.
pub struct WhoWasList {
    buffer: Vec<Option<WhoWas>>,
    start: usize,
    end: usize,
}

impl WhoWasList {
    pub fn new(size: usize) -> Self {
        WhoWasList { buffer: vec![None; size.max(1)], start: 0, end: 0 }
    }

    pub fn append(&mut self, entry: WhoWas) {
        self.buffer[self.end] = Some(entry);
        self.end = (self.end + 1) % self.buffer.len();
        if self.end == self.start {
            self.start = (self.end + 1) % self.buffer.len();
        }
    }

    /// Up to `limit` matches for `nickname`, newest first. A missing count
    /// reaches here as zero, which stops after the first match: asking
    /// without a count gets the newest entry only, never the whole ring.
    pub fn find(&self, nickname: &Name, limit: i64) -> Vec<WhoWas> {
        let mut results = Vec::new();
        for entry in self.iter_newest_first() {
            if entry.nickname != *nickname {
                continue;
            }
            results.push(entry.clone());
            if results.len() as i64 >= limit {
                break;
            }
        }
        results
    }

    fn prev(&self, index: usize) -> usize {
        if index == 0 { self.buffer.len() - 1 } else { index - 1 }
    }

    fn iter_newest_first(&self) -> impl Iterator<Item = &WhoWas> {
        let mut index = self.end;
        let mut remaining = if self.start <= self.end {
            self.end - self.start
        } else {
            self.buffer.len() - self.start + self.end
        };
        std::iter::from_fn(move || {
            while remaining > 0 {
                index = self.prev(index);
                remaining -= 1;
                if let Some(entry) = self.buffer[index].as_ref() {
                    return Some(entry);
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(nick: &str, user: &str) -> WhoWas {
        WhoWas {
            nickname: Name::new(nick),
            username: user.to_owned(),
            hostname: "host".to_owned(),
            hostmask: "abc.masked".to_owned(),
            realname: "Real".to_owned(),
        }
    }

    #[test]
    fn whowas_returns_newest_first() {
        let mut list = WhoWasList::new(10);
        list.append(snapshot("ghost", "first"));
        list.append(snapshot("other", "x"));
        list.append(snapshot("ghost", "second"));

        let found = list.find(&Name::new("GHOST"), 10);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].username, "second");
        assert_eq!(found[1].username, "first");
    }

    #[test]
    fn whowas_without_count_returns_only_the_newest() {
        let mut list = WhoWasList::new(10);
        list.append(snapshot("ghost", "first"));
        list.append(snapshot("ghost", "second"));

        let found = list.find(&Name::new("ghost"), 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "second");
    }

    #[test]
    fn whowas_respects_the_limit() {
        let mut list = WhoWasList::new(10);
        for i in 0..5 {
            list.append(snapshot("ghost", &format!("u{i}")));
        }
        let found = list.find(&Name::new("ghost"), 2);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].username, "u4");
    }

    #[test]
    fn whowas_overwrites_oldest_when_full() {
        let mut list = WhoWasList::new(3);
        for i in 0..5 {
            list.append(snapshot("ghost", &format!("u{i}")));
        }
        let found = list.find(&Name::new("ghost"), 10);
        // capacity 3, one slot sacrificed to the start/end sentinel
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].username, "u4");
        assert_eq!(found[1].username, "u3");
    }

    #[test]
    fn whowas_misses_are_empty() {
        let list = WhoWasList::new(4);
        assert!(list.find(&Name::new("nobody"), 5).is_empty());
    }
}
