//! Staff notifications. Delivery is fire-and-forget: a failed send is logged, never rolled back.
use std::collections::BTreeMap;

use tracing::warn;

use super::types::TimeStamp;
use super::utils::new_record_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum NotificationKind {
    #[n(0)]
    RecordInvalidatedReserved,
    #[n(1)]
    ReservationApproved,
    #[n(2)]
    ReservationDeclined,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub kind: NotificationKind,
    #[n(3)]
    pub payload: BTreeMap<String, String>,
    #[n(4)]
    pub created_at: TimeStamp,
}

pub trait NotificationSink {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

impl Notification {
    pub fn new(user_id: &str, kind: NotificationKind) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_record_id("ntf")?,
            user_id: user_id.to_string(),
            kind,
            payload: BTreeMap::new(),
            created_at: TimeStamp::now(),
        })
    }
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Build and send a notification, logging instead of failing.
pub fn dispatch(
    sink: &impl NotificationSink,
    user_id: &str,
    kind: NotificationKind,
    payload: &[(&str, String)],
) {
    let sent = Notification::new(user_id, kind).and_then(|n| {
        let n = payload
            .iter()
            .fold(n, |n, (key, value)| n.with(key, value.clone()));
        sink.notify(&n)
    });
    if let Err(err) = sent {
        warn!(user = %user_id, kind = ?kind, error = %err, "notification was not delivered");
    }
}
