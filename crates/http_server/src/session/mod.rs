//! Cookie-backed sessions.
//!
//! A session is identified by a 32-hex-character `sessionId` cookie and
//! holds string key/value data server-side. Storage is pluggable behind
//! [`SessionStorage`]; the in-memory backend suits a single process.
//! Mutated sessions are persisted explicitly through the manager.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::http::{request::Request, response::Response};

const SESSION_COOKIE: &str = "sessionId";

/// One client's server-side state.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: HashMap<String, String>,
    expires_at: Instant,
    max_age: Duration,
}

impl Session {
    fn new(id: String, max_age: Duration) -> Self {
        Self {
            id,
            data: HashMap::new(),
            expires_at: Instant::now() + max_age,
            max_age,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.data.remove(key);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    /// Pushes the expiry another max-age into the future.
    pub fn refresh(&mut self) {
        self.expires_at = Instant::now() + self.max_age;
    }
}

/// Pluggable session persistence.
pub trait SessionStorage: Send + Sync {
    fn load(&self, id: &str) -> Option<Session>;
    fn save(&self, session: &Session);
    fn remove(&self, id: &str);
}

/// Keeps sessions in process memory. Expired entries are dropped when
/// they are next looked up.
#[derive(Default)]
pub struct MemorySessionStorage {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.get(id).is_some_and(Session::is_expired) {
            sessions.remove(id);
            return None;
        }
        sessions.get(id).cloned()
    }

    fn save(&self, session: &Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
    }

    fn remove(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }
}

/// Issues, loads, and persists sessions, owning the cookie contract.
pub struct SessionManager {
    storage: Box<dyn SessionStorage>,
    max_age: Duration,
}

impl SessionManager {
    pub fn new(storage: Box<dyn SessionStorage>) -> Self {
        Self {
            storage,
            max_age: Duration::from_secs(3600),
        }
    }

    pub fn with_max_age(storage: Box<dyn SessionStorage>, max_age: Duration) -> Self {
        Self { storage, max_age }
    }

    /// Returns the request's session, creating one when the cookie is
    /// missing, unknown, or expired. A fresh session sets the cookie on
    /// the response.
    pub fn session(&self, request: &Request, response: &mut Response) -> Session {
        let existing = request
            .header("Cookie")
            .and_then(session_id_from_cookie)
            .and_then(|id| self.storage.load(&id))
            .filter(|session| !session.is_expired());

        let mut session = match existing {
            Some(session) => session,
            None => {
                let id = Uuid::new_v4().simple().to_string();
                response.set_header(
                    "Set-Cookie",
                    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly"),
                );
                Session::new(id, self.max_age)
            }
        };
        session.refresh();
        self.storage.save(&session);
        session
    }

    /// Persists a session mutated by a handler.
    pub fn save(&self, session: &Session) {
        self.storage.save(session);
    }

    pub fn destroy(&self, id: &str) {
        self.storage.remove(id);
    }
}

/// Pulls the `sessionId` value out of a `Cookie` header, up to the next
/// semicolon.
fn session_id_from_cookie(cookie: &str) -> Option<String> {
    let start = cookie.find("sessionId=")? + SESSION_COOKIE.len() + 1;
    let rest = &cookie[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}
