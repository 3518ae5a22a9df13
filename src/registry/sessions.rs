use tracing::{debug, error};

use crate::scene::{get_i64, get_string, SceneHost, ScenePath};
use crate::tokens;

/// Connection settings of one ion server prim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IonSession {
    pub path: ScenePath,
    pub server_url: String,
    pub api_url: String,
    pub application_id: i64,
    pub default_access_token: String,
}

impl IonSession {
    pub fn read_from(stage: &dyn SceneHost, path: &ScenePath) -> Self {
        Self {
            path: path.clone(),
            server_url: get_string(stage, path, tokens::ION_SERVER_URL).unwrap_or_default(),
            api_url: get_string(stage, path, tokens::ION_SERVER_API_URL).unwrap_or_default(),
            application_id: get_i64(stage, path, tokens::ION_SERVER_APPLICATION_ID, 0),
            default_access_token: get_string(stage, path, tokens::PROJECT_DEFAULT_ION_ACCESS_TOKEN)
                .unwrap_or_default(),
        }
    }
}

/// Ion servers known to the current stage, keyed by prim path.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<IonSession>,
}

impl SessionRegistry {
    /// Registers a server, replacing the settings of one already at that
    /// path.
    pub fn add_session(&mut self, session: IonSession) {
        debug!(server = %session.path, api_url = %session.api_url, "Registering ion session");
        match self.sessions.iter_mut().find(|s| s.path == session.path) {
            Some(existing) => *existing = session,
            None => self.sessions.push(session),
        }
    }

    pub fn remove_session(&mut self, path: &ScenePath) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| &s.path != path);
        let removed = self.sessions.len() != before;
        if !removed {
            error!(server = %path, "Removing an ion session that was never registered");
        }
        removed
    }

    pub fn session(&self, path: &ScenePath) -> Option<&IonSession> {
        self.sessions.iter().find(|s| &s.path == path)
    }

    pub fn exists(&self, path: &ScenePath) -> bool {
        self.session(path).is_some()
    }

    pub fn server_paths(&self) -> Vec<ScenePath> {
        self.sessions.iter().map(|s| s.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
