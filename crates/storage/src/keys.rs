use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use sift_core::{ApiKeyRecord, Scope, SiftError};

use crate::row::{ApiKeyRow, API_KEY_COLUMNS};
use crate::Storage;

/// Keys look like `sk_<key id, 32 hex><secret, 40 hex>`. Embedding the id
/// makes authentication a single row lookup; the stored hash is salted so
/// a leaked table never yields usable keys.
const KEY_PREFIX: &str = "sk_";
const SECRET_BYTES: usize = 20;
const SALT_BYTES: usize = 8;

/// Extract the key id from a presented plaintext key.
pub fn parse_key_id(plaintext: &str) -> Option<Uuid> {
    let rest = plaintext.strip_prefix(KEY_PREFIX)?;
    if rest.len() != 32 + SECRET_BYTES * 2 {
        return None;
    }
    Uuid::try_parse(&rest[..32]).ok()
}

fn salted_hash(salt: &str, plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

fn verify_hash(stored: &str, plaintext: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    salted_hash(salt, plaintext) == digest
}

impl Storage {
    /// Create an API key. The plaintext is returned exactly once, here;
    /// only its salted hash is stored.
    pub async fn create_api_key(
        &self,
        name: &str,
        scopes: &[Scope],
        rate_limit: i32,
    ) -> Result<(String, ApiKeyRecord), SiftError> {
        let id = Uuid::new_v4();
        let mut secret = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut secret);
        let plaintext = format!("{KEY_PREFIX}{}{}", id.simple(), hex::encode(secret));

        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let key_hash = format!("{salt}${}", salted_hash(&salt, &plaintext));

        let scope_strings: Vec<String> = scopes.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            r#"INSERT INTO api_keys (id, key_hash, name, scopes, rate_limit)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {API_KEY_COLUMNS}"#
        );
        let row: ApiKeyRow = sqlx::query_as(&query)
            .bind(id)
            .bind(&key_hash)
            .bind(name)
            .bind(&scope_strings)
            .bind(rate_limit)
            .fetch_one(self.pool())
            .await
            .map_err(SiftError::storage)?;

        Ok((plaintext, row.into()))
    }

    /// Verify a presented key and touch `last_used_at`. Inactive (revoked)
    /// keys fail the same way unknown ones do.
    pub async fn authenticate_api_key(&self, plaintext: &str) -> Result<ApiKeyRecord, SiftError> {
        let id = parse_key_id(plaintext)
            .ok_or_else(|| SiftError::Unauthorized("malformed API key".into()))?;

        let query = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1");
        let row: Option<ApiKeyRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(SiftError::storage)?;

        let Some(row) = row else {
            return Err(SiftError::Unauthorized("unknown API key".into()));
        };
        if !row.is_active || !verify_hash(&row.key_hash, plaintext) {
            return Err(SiftError::Unauthorized("unknown API key".into()));
        }

        sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(SiftError::storage)?;

        Ok(row.into())
    }

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>, SiftError> {
        let query = format!("SELECT {API_KEY_COLUMNS} FROM api_keys ORDER BY created_at ASC");
        let rows: Vec<ApiKeyRow> = sqlx::query_as(&query)
            .fetch_all(self.pool())
            .await
            .map_err(SiftError::storage)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Soft revocation; history stays queryable.
    pub async fn revoke_api_key(&self, id: Uuid) -> Result<bool, SiftError> {
        let result = sqlx::query("UPDATE api_keys SET is_active = false WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(SiftError::storage)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn rename_api_key(&self, id: Uuid, name: &str) -> Result<bool, SiftError> {
        let result = sqlx::query("UPDATE api_keys SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(SiftError::storage)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_round_trips_through_plaintext() {
        let id = Uuid::new_v4();
        let plaintext = format!("{KEY_PREFIX}{}{}", id.simple(), "ab".repeat(SECRET_BYTES));
        assert_eq!(parse_key_id(&plaintext), Some(id));
    }

    #[test]
    fn malformed_keys_do_not_parse() {
        assert_eq!(parse_key_id("sk_short"), None);
        assert_eq!(parse_key_id("not-a-key"), None);
        assert_eq!(parse_key_id(""), None);
    }

    #[test]
    fn hash_verification_is_salt_sensitive() {
        let stored = format!("deadbeef${}", salted_hash("deadbeef", "sk_secret"));
        assert!(verify_hash(&stored, "sk_secret"));
        assert!(!verify_hash(&stored, "sk_other"));
        let wrong_salt = format!("feedface${}", salted_hash("deadbeef", "sk_secret"));
        assert!(!verify_hash(&wrong_salt, "sk_secret"));
    }
}
