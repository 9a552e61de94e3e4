use serde_json::Value;

use crate::error::RelayError;
use crate::session::{DeliveryStatus, ListenerId, Session, SessionConfig};
use crate::transport::Connector;
use crate::ChannelEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    Joined(String),
    AlreadyJoined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveStatus {
    Left(String),
    NotJoined,
}

/// Holds at most one live [`Session`] and exposes the join/leave surface a
/// host embeds: channel names are trimmed, joining the current channel is
/// a no-op, joining a different one leaves the old channel first, and all
/// reads degrade to empty sentinels when no channel is joined.
pub struct ChannelClient<C: Connector> {
    connector: C,
    config: SessionConfig,
    session: Option<Session>,
}

impl<C: Connector> ChannelClient<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, SessionConfig::default())
    }

    pub fn with_config(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            session: None,
        }
    }

    pub fn join(&mut self, channel: &str) -> Result<JoinStatus, RelayError> {
        let channel = channel.trim();
        if let Some(session) = &self.session {
            if session.channel_name() == channel {
                return Ok(JoinStatus::AlreadyJoined);
            }
        }
        if self.session.is_some() {
            self.leave();
        }
        let session = Session::join_with(&self.connector, channel, self.config)?;
        self.session = Some(session);
        Ok(JoinStatus::Joined(channel.to_string()))
    }

    pub fn leave(&mut self) -> LeaveStatus {
        match self.session.take() {
            Some(session) => {
                let name = session.channel_name().to_string();
                session.close();
                LeaveStatus::Left(name)
            }
            None => LeaveStatus::NotJoined,
        }
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.session.as_ref().map(Session::channel_name)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// `Value::Null` when the key was never set or no channel is joined.
    pub fn value_of(&self, key: &str) -> Value {
        self.session
            .as_ref()
            .and_then(|s| s.get_value(key))
            .unwrap_or(Value::Null)
    }

    pub fn set_value(&self, key: &str, value: Value) -> DeliveryStatus {
        match &self.session {
            Some(session) => session.set_value(key, value),
            None => DeliveryStatus::NotJoined,
        }
    }

    pub fn send_event(&self, event_type: &str, data: Value) -> DeliveryStatus {
        let event_type = event_type.trim();
        match &self.session {
            Some(session) => session.broadcast_event(event_type, data),
            None => DeliveryStatus::NotJoined,
        }
    }

    /// Empty string when no event has been observed or no channel is
    /// joined.
    pub fn last_event_type(&self) -> String {
        self.session
            .as_ref()
            .and_then(Session::last_event)
            .map(|e| e.event_type)
            .unwrap_or_default()
    }

    pub fn last_event_data(&self) -> Value {
        self.session
            .as_ref()
            .and_then(Session::last_event)
            .map(|e| e.data)
            .unwrap_or(Value::Null)
    }

    pub fn add_listener(
        &self,
        listener: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> Option<ListenerId> {
        self.session.as_ref().map(|s| s.add_listener(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) {
        if let Some(session) = &self.session {
            session.remove_listener(id);
        }
    }
}
