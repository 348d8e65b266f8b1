/// Database row types, mapped straight from SQLite columns.
/// Converted into boutique-types models at the query boundary.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: i64,
    pub message: String,
    pub notification_type: String,
    pub created_at: String,
    pub is_read: bool,
}
