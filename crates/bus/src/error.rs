#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("invalid broker host/port: {0}")]
    InvalidAddress(String),

    #[error("failed to create eventfd notifier: {0}")]
    Notifier(#[from] std::io::Error),

    #[error("reactor registration failed: {0}")]
    Reactor(#[from] reactor::ReactorError),

    #[error("payload for topic {topic} is not valid JSON: {reason}")]
    Payload { topic: String, reason: String },
}
