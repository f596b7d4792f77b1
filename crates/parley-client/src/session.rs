use std::sync::RwLock;

use parley_types::models::UserProfile;

/// In-memory session state: the access token and the signed-in user.
/// The refresh token never appears here — it lives in the HTTP client's
/// cookie store, inaccessible to application code.
#[derive(Default)]
pub struct Session {
    inner: RwLock<SessionState>,
}

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    user: Option<UserProfile>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .access_token
            .clone()
    }

    pub fn set_access_token(&self, token: String) {
        self.inner
            .write()
            .expect("session lock poisoned")
            .access_token = Some(token);
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.read().expect("session lock poisoned").user.clone()
    }

    pub fn set_user(&self, user: UserProfile) {
        self.inner.write().expect("session lock poisoned").user = Some(user);
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner
            .read()
            .expect("session lock poisoned")
            .access_token
            .is_some()
    }

    /// Drop both token and user, e.g. after a failed refresh or logout.
    pub fn clear(&self) {
        let mut state = self.inner.write().expect("session lock poisoned");
        state.access_token = None;
        state.user = None;
    }
}
