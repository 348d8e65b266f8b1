use boutique_types::models::{NotificationId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("notification not found: {0}")]
    NotificationNotFound(NotificationId),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("DB lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_) | Self::NotificationNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
