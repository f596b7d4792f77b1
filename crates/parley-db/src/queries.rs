use crate::models::{ConversationRow, MessageRow, UserRow};
use crate::Database;
use anyhow::{Result, anyhow};
use rusqlite::{OptionalExtension, Row};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, is_verified, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                (id, name, email, password_hash, now),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .prepare(&format!("{USER_COLUMNS} WHERE email = ?1"))?
                .query_row([email], map_user_row)
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .prepare(&format!("{USER_COLUMNS} WHERE id = ?1"))?
                .query_row([id], map_user_row)
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{USER_COLUMNS} ORDER BY name"))?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive name substring search.
    pub fn search_users(&self, query: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{USER_COLUMNS} WHERE LOWER(name) LIKE '%' || LOWER(?1) || '%' ORDER BY name"
            ))?;
            let rows = stmt
                .query_map([query], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Partial profile update; unset fields keep their current value.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET name = COALESCE(?2, name), avatar = COALESCE(?3, avatar)
                 WHERE id = ?1",
                (id, name, avatar),
            )?;
            conn.prepare(&format!("{USER_COLUMNS} WHERE id = ?1"))?
                .query_row([id], map_user_row)
                .optional()?
                .ok_or_else(|| anyhow!("user not found: {}", id))
        })
    }

    pub fn set_otp(&self, user_id: &str, otp: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET otp = ?2, otp_expires_at = ?3 WHERE id = ?1",
                (user_id, otp, expires_at),
            )?;
            if changed == 0 {
                return Err(anyhow!("user not found: {}", user_id));
            }
            Ok(())
        })
    }

    /// Promote to verified and clear the OTP fields in one statement.
    pub fn mark_verified(&self, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_verified = 1, otp = NULL, otp_expires_at = NULL
                 WHERE id = ?1",
                [user_id],
            )?;
            Ok(())
        })
    }

    // -- Conversations --

    /// The direct conversation for an unordered member pair, if one exists.
    pub fn find_direct_conversation(&self, user_a: &str, user_b: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT c.id FROM conversations c
                     JOIN conversation_members m1
                       ON m1.conversation_id = c.id AND m1.user_id = ?1
                     JOIN conversation_members m2
                       ON m2.conversation_id = c.id AND m2.user_id = ?2
                     WHERE c.is_group = 0
                     LIMIT 1",
                    (user_a, user_b),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    pub fn create_direct_conversation(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, is_group, created_at, updated_at)
                 VALUES (?1, 0, ?2, ?2)",
                (id, now),
            )?;
            for member in [user_a, user_b] {
                tx.execute(
                    "INSERT INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
                    (id, member),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn create_group_conversation(
        &self,
        id: &str,
        name: &str,
        member_ids: &[String],
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, name, is_group, created_at, updated_at)
                 VALUES (?1, ?2, 1, ?3, ?3)",
                (id, name, now),
            )?;
            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id)
                     VALUES (?1, ?2)",
                    (id, member),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .prepare(&format!("{CONVERSATION_COLUMNS} WHERE id = ?1"))?
                .query_row([id], map_conversation_row)
                .optional()?;
            Ok(row)
        })
    }

    /// All conversations containing the user, newest-updated first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group, c.last_message, c.unread_count,
                        c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn conversation_members(&self, conversation_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email, u.password, u.avatar, u.is_verified,
                        u.otp, u.otp_expires_at, u.created_at
                 FROM users u
                 JOIN conversation_members m ON m.user_id = u.id
                 WHERE m.conversation_id = ?1
                 ORDER BY u.name",
            )?;
            let rows = stmt
                .query_map([conversation_id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_member(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    (conversation_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// No-op if the user is already a member.
    pub fn add_member(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id)
                 VALUES (?1, ?2)",
                (conversation_id, user_id),
            )?;
            Ok(())
        })
    }

    pub fn remove_member(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM conversation_members
                 WHERE conversation_id = ?1 AND user_id = ?2",
                (conversation_id, user_id),
            )?;
            Ok(())
        })
    }

    pub fn rename_conversation(&self, conversation_id: &str, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET name = ?2 WHERE id = ?1",
                (conversation_id, name),
            )?;
            Ok(())
        })
    }

    pub fn reset_unread(&self, conversation_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
                [conversation_id],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message and refresh the conversation's denormalized preview
    /// (last_message, updated_at, unread_count) in a single transaction.
    pub fn create_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        kind: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (id, conversation_id, sender_id, content, kind, now),
            )?;
            let changed = tx.execute(
                "UPDATE conversations
                 SET last_message = ?2, updated_at = ?3, unread_count = unread_count + 1
                 WHERE id = ?1",
                (conversation_id, content, now),
            )?;
            if changed == 0 {
                return Err(anyhow!("conversation not found: {}", conversation_id));
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Messages in ascending creation order. `before` is an exclusive RFC3339
    /// cursor for fetching older pages.
    pub fn list_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let rows = match before {
                Some(cursor) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, conversation_id, sender_id, content, kind, created_at
                         FROM messages
                         WHERE conversation_id = ?1 AND created_at < ?2
                         ORDER BY created_at ASC, id ASC
                         LIMIT ?3",
                    )?;
                    stmt.query_map((conversation_id, cursor, limit), map_message_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, conversation_id, sender_id, content, kind, created_at
                         FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at ASC, id ASC
                         LIMIT ?2",
                    )?;
                    stmt.query_map((conversation_id, limit), map_message_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }
}

const USER_COLUMNS: &str = "SELECT id, name, email, password, avatar, is_verified, \
                            otp, otp_expires_at, created_at FROM users";

const CONVERSATION_COLUMNS: &str = "SELECT id, name, is_group, last_message, unread_count, \
                                    created_at, updated_at FROM conversations";

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar: row.get(4)?,
        is_verified: row.get(5)?,
        otp: row.get(6)?,
        otp_expires_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_conversation_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        last_message: row.get(3)?,
        unread_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        kind: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::{Database, now_rfc3339, parse_rfc3339};
    use uuid::Uuid;

    fn seed_user(db: &Database, name: &str, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, name, email, "hash", &now_rfc3339())
            .unwrap();
        id
    }

    #[test]
    fn user_starts_unverified_and_otp_lifecycle_clears_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "Alice", "a@x.com");

        let user = db.get_user_by_email("a@x.com").unwrap().unwrap();
        assert!(!user.is_verified);
        assert!(user.otp.is_none());

        db.set_otp(&id, "123456", &now_rfc3339()).unwrap();
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(user.otp.as_deref(), Some("123456"));
        assert!(user.otp_expires_at.is_some());

        db.mark_verified(&id).unwrap();
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert!(user.is_verified);
        assert!(user.otp.is_none());
        assert!(user.otp_expires_at.is_none());
    }

    #[test]
    fn direct_conversation_lookup_is_order_independent() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "Alice", "a@x.com");
        let b = seed_user(&db, "Bob", "b@x.com");

        assert!(db.find_direct_conversation(&a, &b).unwrap().is_none());

        let convo = Uuid::new_v4().to_string();
        db.create_direct_conversation(&convo, &a, &b, &now_rfc3339())
            .unwrap();

        assert_eq!(db.find_direct_conversation(&a, &b).unwrap(), Some(convo.clone()));
        assert_eq!(db.find_direct_conversation(&b, &a).unwrap(), Some(convo));
    }

    #[test]
    fn group_membership_add_is_idempotent_and_remove_works() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "Alice", "a@x.com");
        let b = seed_user(&db, "Bob", "b@x.com");
        let c = seed_user(&db, "Carol", "c@x.com");

        let convo = Uuid::new_v4().to_string();
        db.create_group_conversation(&convo, "team", &[a.clone(), b.clone()], &now_rfc3339())
            .unwrap();

        assert!(db.is_member(&convo, &a).unwrap());
        assert!(!db.is_member(&convo, &c).unwrap());

        db.add_member(&convo, &c).unwrap();
        db.add_member(&convo, &c).unwrap(); // second add is a no-op
        assert!(db.is_member(&convo, &c).unwrap());
        assert_eq!(db.conversation_members(&convo).unwrap().len(), 3);

        db.remove_member(&convo, &b).unwrap();
        assert!(!db.is_member(&convo, &b).unwrap());
    }

    #[test]
    fn send_updates_preview_and_listing_is_ascending() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "Alice", "a@x.com");
        let b = seed_user(&db, "Bob", "b@x.com");
        let convo = Uuid::new_v4().to_string();
        db.create_direct_conversation(&convo, &a, &b, &now_rfc3339())
            .unwrap();

        for content in ["one", "two", "three"] {
            let ts = now_rfc3339();
            db.create_message(
                &Uuid::new_v4().to_string(),
                &convo,
                &a,
                content,
                "text",
                &ts,
            )
            .unwrap();
        }

        let rows = db.list_messages(&convo, 50, None).unwrap();
        let contents: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        for pair in rows.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }

        let convo_row = db.get_conversation(&convo).unwrap().unwrap();
        assert_eq!(convo_row.last_message.as_deref(), Some("three"));
        assert_eq!(convo_row.unread_count, 3);
        let updated = parse_rfc3339(&convo_row.updated_at).unwrap();
        let last_created = parse_rfc3339(&rows.last().unwrap().created_at).unwrap();
        assert!(updated >= last_created);

        db.reset_unread(&convo).unwrap();
        let convo_row = db.get_conversation(&convo).unwrap().unwrap();
        assert_eq!(convo_row.unread_count, 0);
    }

    #[test]
    fn message_insert_fails_for_unknown_conversation() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "Alice", "a@x.com");
        let err = db.create_message(
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
            &a,
            "hi",
            "text",
            &now_rfc3339(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn pagination_cursor_excludes_newer_messages() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "Alice", "a@x.com");
        let b = seed_user(&db, "Bob", "b@x.com");
        let convo = Uuid::new_v4().to_string();
        db.create_direct_conversation(&convo, &a, &b, &now_rfc3339())
            .unwrap();

        let mut stamps = Vec::new();
        for content in ["one", "two", "three"] {
            let ts = now_rfc3339();
            stamps.push(ts.clone());
            db.create_message(
                &Uuid::new_v4().to_string(),
                &convo,
                &a,
                content,
                "text",
                &ts,
            )
            .unwrap();
        }

        let page = db.list_messages(&convo, 50, Some(&stamps[2])).unwrap();
        let contents: Vec<&str> = page.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "Alice Carter", "a@x.com");
        seed_user(&db, "Bob", "b@x.com");

        let hits = db.search_users("CART").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Alice Carter");

        assert!(db.search_users("zzz").unwrap().is_empty());
    }

    #[test]
    fn list_conversations_orders_by_recency() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "Alice", "a@x.com");
        let b = seed_user(&db, "Bob", "b@x.com");
        let c = seed_user(&db, "Carol", "c@x.com");

        let first = Uuid::new_v4().to_string();
        db.create_direct_conversation(&first, &a, &b, &now_rfc3339())
            .unwrap();
        let second = Uuid::new_v4().to_string();
        db.create_direct_conversation(&second, &a, &c, &now_rfc3339())
            .unwrap();

        // A message in the older conversation bumps it to the top.
        db.create_message(
            &Uuid::new_v4().to_string(),
            &first,
            &b,
            "ping",
            "text",
            &now_rfc3339(),
        )
        .unwrap();

        let list = db.list_conversations_for_user(&a).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, first);
    }
}
