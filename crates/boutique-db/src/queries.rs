use boutique_types::models::{
    Notification, NotificationId, NotificationKind, User, UserId, format_timestamp,
};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::models::{NotificationRow, UserRow};
use crate::{Database, Result, StoreError};

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str) -> Result<User> {
        let now = Utc::now().trunc_subsecs(6);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                (username, format_timestamp(&now)),
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                created_at: now,
            })
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(|conn| query_user_by_id(conn, id)?.map(User::try_from).transpose())
    }

    // -- Notifications --

    /// Store a new notification for `recipient`.
    pub fn create_notification(
        &self,
        recipient: UserId,
        message: &str,
        kind: NotificationKind,
    ) -> Result<Notification> {
        self.create_notification_at(recipient, message, kind, Utc::now())
    }

    pub(crate) fn create_notification_at(
        &self,
        recipient: UserId,
        message: &str,
        kind: NotificationKind,
        created_at: DateTime<Utc>,
    ) -> Result<Notification> {
        // Stored text keeps microseconds; hand back exactly what a later read returns
        let created_at = created_at.trunc_subsecs(6);
        self.with_conn(|conn| {
            if query_user_by_id(conn, recipient)?.is_none() {
                return Err(StoreError::UserNotFound(recipient));
            }

            conn.execute(
                "INSERT INTO notifications (recipient_id, message, notification_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![recipient, message, kind.as_str(), format_timestamp(&created_at)],
            )?;

            let id = conn.last_insert_rowid();
            debug!("notification {} stored for user {}", id, recipient);

            Ok(Notification {
                id,
                recipient_id: recipient,
                message: message.to_string(),
                kind,
                created_at,
                is_read: false,
            })
        })
    }

    /// All notifications for `recipient`, newest first.
    pub fn list_notifications(&self, recipient: UserId) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            query_notifications(conn, recipient)?
                .into_iter()
                .map(Notification::try_from)
                .collect()
        })
    }

    pub fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>> {
        self.with_conn(|conn| {
            query_notification_by_id(conn, id)?
                .map(Notification::try_from)
                .transpose()
        })
    }

    /// Flip the read flag. Marking an already-read notification is a no-op.
    pub fn mark_read(&self, id: NotificationId) -> Result<()> {
        self.with_conn(|conn| {
            // SQLite counts matched rows, so an already-read row still reports 1
            let changed = conn.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
            if changed == 0 {
                return Err(StoreError::NotificationNotFound(id));
            }
            Ok(())
        })
    }

    pub fn unread_count(&self, recipient: UserId) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
                [recipient],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, message, notification_type, created_at, is_read";

fn notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        message: row.get(2)?,
        notification_type: row.get(3)?,
        created_at: row.get(4)?,
        is_read: row.get(5)?,
    })
}

fn query_user_by_id(conn: &Connection, id: UserId) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            "SELECT id, username, created_at FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

fn query_notification_by_id(conn: &Connection, id: NotificationId) -> Result<Option<NotificationRow>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], notification_row).optional()?)
}

fn query_notifications(conn: &Connection, recipient: UserId) -> Result<Vec<NotificationRow>> {
    // Ties on created_at fall back to insertion order, newest first
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE recipient_id = ?1
         ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([recipient], notification_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn parse_timestamp(raw: &str, what: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| StoreError::CorruptRow(format!("{what} created_at '{raw}': {e}")))
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            created_at: parse_timestamp(&row.created_at, &format!("user {}", row.id))?,
            id: row.id,
            username: row.username,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        let kind = row.notification_type.parse::<NotificationKind>().map_err(|e| {
            StoreError::CorruptRow(format!("notification {}: {}", row.id, e))
        })?;

        Ok(Notification {
            created_at: parse_timestamp(&row.created_at, &format!("notification {}", row.id))?,
            id: row.id,
            recipient_id: row.recipient_id,
            message: row.message,
            kind,
            is_read: row.is_read,
        })
    }
}
