//! Session registry.
//!
//! Maps origin keys to live sessions and keeps an insertion-ordered
//! view for the liveness reaper. A session exists exactly as long as
//! its origin is a key here; removal drops the session, which tears
//! down its sink input and receive task.

use std::collections::HashMap;

use crate::config::MAX_SESSIONS;
use crate::error::{Error, Result};
use crate::session::Session;

/// All live sessions, keyed by SDP origin.
#[derive(Default)]
pub struct SessionRegistry {
    // ---
    by_origin: HashMap<String, Session>,
    order: Vec<String>,
}

impl SessionRegistry {
    // ---
    pub fn new() -> Self {
        // ---
        Self::default()
    }

    pub fn len(&self) -> usize {
        // ---
        self.by_origin.len()
    }

    pub fn is_empty(&self) -> bool {
        // ---
        self.by_origin.is_empty()
    }

    /// True when another session would exceed the cap.
    pub fn is_full(&self) -> bool {
        // ---
        self.by_origin.len() >= MAX_SESSIONS
    }

    pub fn contains(&self, origin: &str) -> bool {
        // ---
        self.by_origin.contains_key(origin)
    }

    pub fn get(&self, origin: &str) -> Option<&Session> {
        // ---
        self.by_origin.get(origin)
    }

    /// Adds a session under its origin key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capacity` when the cap is reached; the session is
    /// dropped (and thereby torn down) in that case.
    pub fn insert(&mut self, session: Session) -> Result<()> {
        // ---
        if self.is_full() {
            return Err(Error::Capacity(self.by_origin.len()));
        }

        let origin = session.origin().to_string();
        if self.by_origin.insert(origin.clone(), session).is_none() {
            self.order.push(origin);
        }
        Ok(())
    }

    /// Removes and returns the session for `origin`; dropping the
    /// returned value destroys it.
    pub fn remove(&mut self, origin: &str) -> Option<Session> {
        // ---
        let session = self.by_origin.remove(origin)?;
        self.order.retain(|o| o != origin);
        Some(session)
    }

    /// Sessions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        // ---
        self.order.iter().filter_map(|o| self.by_origin.get(o))
    }

    /// Removes every session, destroying them all.
    pub fn clear(&mut self) {
        // ---
        self.by_origin.clear();
        self.order.clear();
    }
}
