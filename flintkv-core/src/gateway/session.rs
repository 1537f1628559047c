//! Per-connection session state.

use super::policy::Role;

/// Authentication state machine for one connection-equivalent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// One client session as the gateway sees it.
#[derive(Debug)]
pub struct Session {
    id: u64,
    state: SessionState,
    username: Option<String>,
    role: Role,
}

impl Session {
    /// New session. Under an open policy (no auth required) sessions start
    /// authenticated with full scope, matching a store with no credentials
    /// configured.
    pub fn new(id: u64, require_auth: bool) -> Self {
        if require_auth {
            Self {
                id,
                state: SessionState::Unauthenticated,
                username: None,
                role: Role::ReadOnly,
            }
        } else {
            Self {
                id,
                state: SessionState::Authenticated,
                username: None,
                role: Role::Admin,
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Successful AUTH: grant the credential's scope.
    pub fn promote(&mut self, username: &str, role: Role) {
        self.state = SessionState::Authenticated;
        self.username = Some(username.to_string());
        self.role = role;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_required_starts_unauthenticated() {
        let session = Session::new(1, true);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_open_policy_starts_with_full_scope() {
        let session = Session::new(1, false);
        assert!(session.is_authenticated());
        assert_eq!(session.role(), Role::Admin);
    }

    #[test]
    fn test_promote_then_close() {
        let mut session = Session::new(7, true);
        session.promote("ops", Role::ReadWrite);
        assert!(session.is_authenticated());
        assert_eq!(session.username(), Some("ops"));
        assert_eq!(session.role(), Role::ReadWrite);

        session.close();
        assert!(session.is_closed());
        assert!(!session.is_authenticated());
    }
}
