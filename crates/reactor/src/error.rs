#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("fd {0} is already registered")]
    AlreadyRegistered(i32),

    #[error("fd {0} is not registered")]
    NotRegistered(i32),

    #[error("mio registry operation failed: {0}")]
    Io(#[from] std::io::Error),
}
