use std::fmt;

/// Events published on the notification bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    ConfigUpdateReceived,
    ConfigmapUpdateSuccess,
    ConfigmapUpdateFailure,
    ChangeSetPushSuccess,
    ChangeSetPushFailure,
    AuditFailure,
    NfMgmtIntfReady,
    NfMgmtIntfChanged,
}

/// Ordered key/value pairs identifying the objects an event concerns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedObjects(Vec<(&'static str, String)>);

/// Fire-and-forget event publication.
pub trait NotificationBus: Send + Sync {
    fn send_event(&self, name: EventName, objects: ManagedObjects, info: ManagedObjects);
}

// === impl EventName ===

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigUpdateReceived => "CmaasConfigUpdateReceived",
            Self::ConfigmapUpdateSuccess => "CmaasConfigmapUpdateSuccess",
            Self::ConfigmapUpdateFailure => "CmaasConfigmapUpdateFailure",
            Self::ChangeSetPushSuccess => "CmaasChangeSetPushSuccess",
            Self::ChangeSetPushFailure => "CmaasChangeSetPushFailure",
            Self::AuditFailure => "CmaasAuditFailure",
            Self::NfMgmtIntfReady => "NFMgmtIntfReady",
            Self::NfMgmtIntfChanged => "NFMgmtIntfChanged",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ManagedObjects ===

impl ManagedObjects {
    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.0.push((key, value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ManagedObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}
