use super::repo::{Repo, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

/// Player resolved from a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub id: String,
    pub display_name: String,
}

impl Repo {
    // ===== Player operations =====

    /// Create a player (returns player ID)
    pub fn create_player(&self, display_name: &str) -> Result<String, StoreError> {
        let player_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        self.with_conn(|conn, _| {
            conn.execute(
                "INSERT INTO players (id, display_name, created_at) VALUES (?, ?, ?)",
                params![player_id, display_name, now],
            )?;
            Ok(player_id.clone())
        })
    }

    // ===== Session operations =====

    /// Create a new session token for a player
    pub fn create_session(
        &self,
        player_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let token = generate_secure_token();
        let now = Utc::now().timestamp();
        self.with_conn(|conn, _| {
            conn.execute(
                "INSERT INTO sessions (token, player_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
                params![token, player_id, expires_at.timestamp(), now],
            )?;
            Ok(token.clone())
        })
    }

    /// Resolve a session token to its player, if the session is live
    pub fn resolve_session(&self, token: &str) -> Result<Option<PlayerInfo>, StoreError> {
        let now = Utc::now().timestamp();
        self.with_conn(|conn, _| {
            Ok(conn
                .query_row(
                    "SELECT p.id, p.display_name
                     FROM sessions s JOIN players p ON p.id = s.player_id
                     WHERE s.token = ? AND s.expires_at > ?",
                    params![token, now],
                    |row| {
                        Ok(PlayerInfo {
                            id: row.get(0)?,
                            display_name: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Delete a session
    pub fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.with_conn(|conn, _| {
            conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
            Ok(())
        })
    }

    /// Clean up expired sessions
    pub fn cleanup_expired_sessions(&self) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp();
        self.with_conn(|conn, _| Ok(conn.execute("DELETE FROM sessions WHERE expires_at < ?", [now])?))
    }
}

/// Generate a secure random token
fn generate_secure_token() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use rusqlite::Connection;

    fn setup_test_db() -> Repo {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        Repo::new(conn).unwrap()
    }

    #[test]
    fn test_session_flow() {
        let repo = setup_test_db();
        let player_id = repo.create_player("Pixel").unwrap();
        let token = repo
            .create_session(&player_id, Utc::now() + chrono::Duration::days(1))
            .unwrap();
        assert_eq!(token.len(), 43);

        let player = repo.resolve_session(&token).unwrap().unwrap();
        assert_eq!(player.id, player_id);
        assert_eq!(player.display_name, "Pixel");

        repo.delete_session(&token).unwrap();
        assert!(repo.resolve_session(&token).unwrap().is_none());
    }

    #[test]
    fn test_expired_sessions() {
        let repo = setup_test_db();
        let player_id = repo.create_player("Old").unwrap();
        let token = repo
            .create_session(&player_id, Utc::now() - chrono::Duration::hours(1))
            .unwrap();

        assert!(repo.resolve_session(&token).unwrap().is_none());
        assert_eq!(repo.cleanup_expired_sessions().unwrap(), 1);
        assert!(repo.resolve_session("unknown").unwrap().is_none());
    }
}
