use serde::Serialize;
use shared::domain::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    /// Guest sessions learn their user id asynchronously.
    #[default]
    Unresolved,
    Resolved(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectedOutcome {
    pub register: Option<UserId>,
    /// A previous connected period existed; pushes may have been missed.
    pub is_reconnect: bool,
}

/// Tracks socket state and makes sure `register` goes out exactly once per
/// connected period, and only once the local identity is known.
#[derive(Debug, Clone, Default)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    identity: IdentityState,
    registered: bool,
    connected_before: bool,
}

impl ConnectionLifecycle {
    pub fn new(identity: Option<UserId>) -> Self {
        Self {
            identity: identity.map_or(IdentityState::Unresolved, IdentityState::Resolved),
            ..Self::default()
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn identity(&self) -> Option<&UserId> {
        match &self.identity {
            IdentityState::Resolved(user_id) => Some(user_id),
            IdentityState::Unresolved => None,
        }
    }

    pub fn on_connecting(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn on_connected(&mut self) -> ConnectedOutcome {
        if self.state == ConnectionState::Connected {
            return ConnectedOutcome::default();
        }
        self.state = ConnectionState::Connected;
        self.registered = false;
        let is_reconnect = std::mem::replace(&mut self.connected_before, true);
        ConnectedOutcome {
            register: self.take_registration(),
            is_reconnect,
        }
    }

    /// Returns `true` if this ended a connected period.
    pub fn on_disconnected(&mut self) -> bool {
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        self.registered = false;
        was_connected
    }

    /// Resolves the local identity; yields the id to register with when the
    /// socket is already up and has not registered yet.
    pub fn resolve_identity(&mut self, user_id: UserId) -> Option<UserId> {
        if self.identity() == Some(&user_id) {
            return None;
        }
        self.identity = IdentityState::Resolved(user_id);
        self.registered = false;
        self.take_registration()
    }

    fn take_registration(&mut self) -> Option<UserId> {
        if self.registered || self.state != ConnectionState::Connected {
            return None;
        }
        let user_id = self.identity()?.clone();
        self.registered = true;
        Some(user_id)
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
