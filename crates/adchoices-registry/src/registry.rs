//! Session registry — per-frame disclosure state keyed by session id
//!
//! Plain data only: items as registered, the memoized window chain, the
//! aggregation round bookkeeping and the player. Nothing here talks to the
//! host; the engine does that around short, non-reentrant map accesses.

use crate::player::Player;
use adchoices_core::{Error, FrameRef, RawItem, Registration, Result, SessionId};
use adchoices_host::{TimerHandle, WindowChain};
use dashmap::DashMap;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Where a session is in its current aggregation round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Round {
    #[default]
    Idle,
    ChainBuilt,
    SyncCollecting,
    /// Pull requests are out; waiting on replies or the timeout.
    AsyncPending,
    Merged,
    /// Terminal for the round. Late replies are ignored.
    Presented,
}

/// Everything one frame knows about one disclosure session.
#[derive(Debug, Default)]
pub struct SessionData {
    /// Button container id; the last registration that names one wins.
    pub dom_id: Option<String>,
    /// Outermost ancestor's items first, this frame's own last.
    pub items: Vec<RawItem>,
    pub chain: Option<WindowChain>,
    pub round: Round,
    /// Ancestor items gathered this round, keyed by 1-based chain hop.
    pub collected: BTreeMap<usize, Vec<RawItem>>,
    /// Frames sent a pull this round that have not answered, with their hop.
    pub awaiting: HashMap<FrameRef, usize>,
    pub pull_timeout: Option<TimerHandle>,
    pub discovery_timer: Option<TimerHandle>,
    pub player: Option<Player>,
}

pub struct Registry {
    sessions: DashMap<SessionId, SessionData>,
    id_space: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(100_000_000)
    }
}

impl Registry {
    /// `id_space` bounds generated ids to `0..id_space`.
    pub fn new(id_space: u32) -> Self {
        Self { sessions: DashMap::new(), id_space: id_space.max(1) }
    }

    /// Append an item, creating the session if needed.
    pub fn register(&self, id: SessionId, registration: impl Into<Registration>) {
        let Registration { dom_id, item } = registration.into();
        let title = item.title.clone().unwrap_or_default();
        let mut session = self.sessions.entry(id).or_default();
        if dom_id.is_some() {
            session.dom_id = dom_id;
        }
        session.items.push(item);
        info!("Registered item with title \"{}\" for ID {}", title, id);
    }

    /// Insert ancestor items in front of the existing ones, keeping the
    /// batch's own order. Returns `false` if the session is unknown.
    pub fn prepend_items(&self, id: SessionId, items: Vec<RawItem>) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                let count = items.len();
                // Unshifting the reversed batch one by one leaves it in order.
                for item in items.into_iter().rev() {
                    session.items.insert(0, item);
                }
                debug!("Prepended {} parent items for ID {}", count, id);
                true
            }
            None => {
                debug!("Dropping parent items for unknown ID {}", id);
                false
            }
        }
    }

    /// Remove all state for `id`. Idempotent.
    pub fn unregister(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    pub fn get_by_id(&self, id: SessionId) -> Vec<RawItem> {
        self.sessions.get(&id).map(|s| s.items.clone()).unwrap_or_default()
    }

    /// Read and unregister in one step, so items are handed over only once.
    pub fn pull_by_id(&self, id: SessionId) -> Vec<RawItem> {
        self.sessions.remove(&id).map(|(_, s)| s.items).unwrap_or_default()
    }

    pub fn has_id(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn dom_id(&self, id: SessionId) -> Option<String> {
        self.sessions.get(&id).and_then(|s| s.dom_id.clone())
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Draw random ids until one is not live. The id is not reserved.
    pub fn generate_id(&self) -> Result<SessionId> {
        let live = self.sessions.len();
        if live >= self.id_space as usize {
            return Err(Error::IdSpaceExhausted { live, space: self.id_space });
        }
        let mut rng = rand::rng();
        let id = loop {
            let candidate = SessionId::new(rng.random_range(0..self.id_space));
            if !self.has_id(candidate) {
                break candidate;
            }
        };
        info!("Generated ID {}", id);
        Ok(id)
    }

    /// Create the session if it does not exist yet.
    pub fn ensure(&self, id: SessionId) {
        self.sessions.entry(id).or_default();
    }

    /// Run `f` against the session. The closure must not call back into this
    /// registry.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut SessionData) -> R) -> Option<R> {
        self.sessions.get_mut(&id).map(|mut s| f(&mut *s))
    }

    /// Like [`with_session`](Self::with_session), creating the session first.
    pub fn with_session_or_create<R>(&self, id: SessionId, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut session = self.sessions.entry(id).or_default();
        f(&mut *session)
    }
}
