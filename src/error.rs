use thiserror::Error;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("no devices configured to track")]
    NoDevices,
    #[error("malformed observation on {topic}: {reason}")]
    MalformedObservation { topic: String, reason: String },
}

impl PresenceError {
    pub fn malformed(topic: &str, reason: impl ToString) -> Self {
        PresenceError::MalformedObservation {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}
