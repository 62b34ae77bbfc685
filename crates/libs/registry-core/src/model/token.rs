//! Tokens: long-lived client credentials, hashed at rest.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::types::Permissions;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub description: String,
    pub hash: String,
    pub permissions: String,
    pub rate_limit_max: Option<i64>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

impl Token {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    pub fn is_write(&self) -> bool {
        self.permissions == Permissions::Write.as_str()
    }
}

/// Returned exactly once, at creation: the row plus the plaintext secret.
/// Nothing else in this crate ever reconstructs the secret from storage.
#[derive(Debug, Serialize)]
pub struct TokenWithSecret {
    #[serde(flatten)]
    pub token: Token,
    pub secret: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct TokenForCreate {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub rate_limit_max: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Generates a random 32-byte secret, hex-encoded (64 chars).
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hashes a token secret the same way authentication does, so a freshly
/// generated secret and a client-presented one compare equal.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct TokenBmc;

impl TokenBmc {
    pub async fn create(
        _ctx: &Ctx,
        mm: &ModelManager,
        token_c: TokenForCreate,
    ) -> Result<TokenWithSecret> {
        let secret = generate_secret();
        let hash = hash_secret(&secret);
        let id = uuid::Uuid::new_v4().to_string();
        let now = mm.clock.now();

        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO tokens (id, description, hash, permissions, rate_limit_max, created_at, expires_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .await?;
        stmt.execute((
            id.clone(),
            token_c.description,
            hash,
            token_c.permissions.as_str(),
            token_c.rate_limit_max,
            now,
            token_c.expires_at,
        ))
        .await?;

        let token = Self::get(_ctx, mm, &id).await?;
        Ok(TokenWithSecret { token, secret })
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: &str) -> Result<Token> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, description, hash, permissions, rate_limit_max, created_at, expires_at, last_used_at \
                 FROM tokens WHERE id = ?",
            )
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(Error::TokenNotFound)
        }
    }

    /// Looks up a token by the hash of its secret — the only lookup path
    /// authentication uses; the plaintext secret is never stored.
    pub async fn find_by_hash(_ctx: &Ctx, mm: &ModelManager, hash: &str) -> Result<Option<Token>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, description, hash, permissions, rate_limit_max, created_at, expires_at, last_used_at \
                 FROM tokens WHERE hash = ?",
            )
            .await?;
        let mut rows = stmt.query([hash]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list_all(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Token>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, description, hash, permissions, rate_limit_max, created_at, expires_at, last_used_at \
                 FROM tokens ORDER BY created_at ASC",
            )
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(Self::from_row(row)?);
        }
        Ok(out)
    }

    /// Bumps `last_used_at`. Last-write-wins with the provided timestamp:
    /// callers must pass a monotonically non-decreasing `ts` per token for
    /// the timestamp-never-decreases invariant to hold under duplicate
    /// delivery.
    pub async fn touch(_ctx: &Ctx, mm: &ModelManager, id: &str, ts: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE tokens SET last_used_at = ? WHERE id = ? AND (last_used_at IS NULL OR last_used_at < ?)")
            .await?;
        stmt.execute((ts, id, ts)).await?;
        Ok(())
    }

    pub async fn delete(_ctx: &Ctx, mm: &ModelManager, id: &str) -> Result<()> {
        let db = mm.db();
        let stmt = db.prepare("DELETE FROM tokens WHERE id = ?").await?;
        let affected = stmt.execute([id]).await?;
        if affected == 0 {
            return Err(Error::TokenNotFound);
        }
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<Token> {
        Ok(Token {
            id: row.get(0)?,
            description: row.get(1)?,
            hash: row.get(2)?,
            permissions: row.get(3)?,
            rate_limit_max: row.get(4)?,
            created_at: row.get(5)?,
            expires_at: row.get(6)?,
            last_used_at: row.get(7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_returns_secret_once() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let created = TokenBmc::create(&ctx, &mm, TokenForCreate::default()).await.unwrap();
        assert_eq!(created.token.hash, hash_secret(&created.secret));

        // The row itself never carries the plaintext secret.
        let fetched = TokenBmc::get(&ctx, &mm, &created.token.id).await.unwrap();
        let serialized = serde_json::to_string(&fetched).unwrap();
        assert!(!serialized.contains(&created.secret));
    }

    #[tokio::test]
    async fn find_by_hash_matches_generated_secret() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let created = TokenBmc::create(&ctx, &mm, TokenForCreate::default()).await.unwrap();
        let found = TokenBmc::find_by_hash(&ctx, &mm, &hash_secret(&created.secret))
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, created.token.id);
    }

    #[tokio::test]
    async fn unknown_hash_is_none() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let found = TokenBmc::find_by_hash(&ctx, &mm, "deadbeef").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn touch_never_decreases_last_used_at() {
        let mm = ModelManager::new_for_test().await.unwrap();
        let ctx = Ctx::system();
        let created = TokenBmc::create(&ctx, &mm, TokenForCreate::default()).await.unwrap();

        TokenBmc::touch(&ctx, &mm, &created.token.id, 1000).await.unwrap();
        TokenBmc::touch(&ctx, &mm, &created.token.id, 500).await.unwrap();
        let token = TokenBmc::get(&ctx, &mm, &created.token.id).await.unwrap();
        assert_eq!(token.last_used_at, Some(1000));

        TokenBmc::touch(&ctx, &mm, &created.token.id, 2000).await.unwrap();
        let token = TokenBmc::get(&ctx, &mm, &created.token.id).await.unwrap();
        assert_eq!(token.last_used_at, Some(2000));
    }

    #[tokio::test]
    async fn expiry_check() {
        let mut token = Token {
            id: "t".into(),
            description: String::new(),
            hash: String::new(),
            permissions: "readonly".into(),
            rate_limit_max: None,
            created_at: 0,
            expires_at: Some(100),
            last_used_at: None,
        };
        assert!(token.is_expired(200));
        assert!(!token.is_expired(50));
        token.expires_at = None;
        assert!(!token.is_expired(i64::MAX));
    }
}
