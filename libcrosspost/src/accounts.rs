//! Account store for connected social accounts
//!
//! One row per (tenant, platform). Reconnecting a platform overwrites the
//! existing row. Tokens only ever reach the database encrypted by the
//! store's [`TokenCipher`].

use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::credentials::TokenCipher;
use crate::db::Database;
use crate::error::{DbError, Result};
use crate::types::{Account, AccountStatus, PlatformKind};

const ACCOUNT_COLUMNS: &str = "id, tenant_id, platform, access_token, refresh_token, expires_at, \
     status, is_connected, platform_user_id, platform_user_name, page_id, page_name, \
     connected_by, created_at, updated_at";

/// Plaintext tokens obtained from an OAuth exchange
pub struct AccountCredentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<i64>,
}

/// Platform-side identity of a connected account
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub platform_user_id: Option<String>,
    pub platform_user_name: Option<String>,
    pub page_id: Option<String>,
    pub page_name: Option<String>,
}

#[derive(Clone)]
pub struct AccountStore {
    db: Database,
    cipher: TokenCipher,
}

impl AccountStore {
    pub fn new(db: Database, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Insert or overwrite the account for (tenant, platform)
    pub async fn upsert_account(
        &self,
        tenant_id: &str,
        platform: PlatformKind,
        credentials: AccountCredentials,
        profile: AccountProfile,
        connected_by: Option<&str>,
    ) -> Result<Account> {
        let now = chrono::Utc::now().timestamp();
        let access_token = self
            .cipher
            .encrypt(credentials.access_token.expose_secret())?;
        let refresh_token = credentials
            .refresh_token
            .as_ref()
            .map(|t| self.cipher.encrypt(t.expose_secret()))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, tenant_id, platform, access_token, refresh_token, expires_at,
                status, is_connected, platform_user_id, platform_user_name,
                page_id, page_name, connected_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'connected', 1, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                status = 'connected',
                is_connected = 1,
                platform_user_id = excluded.platform_user_id,
                platform_user_name = excluded.platform_user_name,
                page_id = excluded.page_id,
                page_name = excluded.page_name,
                connected_by = COALESCE(excluded.connected_by, accounts.connected_by),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(platform.as_str())
        .bind(access_token)
        .bind(refresh_token)
        .bind(credentials.expires_at)
        .bind(&profile.platform_user_id)
        .bind(&profile.platform_user_name)
        .bind(&profile.page_id)
        .bind(&profile.page_name)
        .bind(connected_by)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = ? AND platform = ?"
        ))
        .bind(tenant_id)
        .bind(platform.as_str())
        .fetch_one(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        tracing::info!(tenant_id, platform = %platform, "Account connected");
        account_from_row(&row)
    }

    /// Connected accounts for a tenant, restricted to `platforms`
    pub async fn find_active(
        &self,
        tenant_id: &str,
        platforms: &[PlatformKind],
    ) -> Result<Vec<Account>> {
        let accounts = self.query_tenant(tenant_id, true).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| platforms.contains(&a.platform))
            .collect())
    }

    /// All accounts for a tenant, connected or not
    pub async fn list_accounts(&self, tenant_id: &str) -> Result<Vec<Account>> {
        self.query_tenant(tenant_id, false).await
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(account_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    /// Flag an account whose credential the upstream rejected
    pub async fn mark_expired(&self, account_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET status = 'expired', is_connected = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(account_id)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        tracing::warn!(account_id, "Account marked as expired");
        Ok(())
    }

    /// Remove the account for (tenant, platform). Returns whether a row existed.
    pub async fn disconnect(&self, tenant_id: &str, platform: PlatformKind) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE tenant_id = ? AND platform = ?")
            .bind(tenant_id)
            .bind(platform.as_str())
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Connected accounts whose token expiry is at or before `deadline`
    pub async fn accounts_expiring_before(&self, deadline: i64) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE is_connected = 1 AND expires_at IS NOT NULL AND expires_at <= ?"
        ))
        .bind(deadline)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    async fn query_tenant(&self, tenant_id: &str, connected_only: bool) -> Result<Vec<Account>> {
        let filter = if connected_only {
            " AND is_connected = 1"
        } else {
            ""
        };
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE tenant_id = ?{filter} ORDER BY platform"
        ))
        .bind(tenant_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let platform: String = row.get("platform");
    let platform = platform
        .parse::<PlatformKind>()
        .map_err(|_| DbError::Serialization(format!("unknown platform '{}'", platform)))?;
    let status: String = row.get("status");
    let status = AccountStatus::parse(&status)
        .ok_or_else(|| DbError::Serialization(format!("unknown account status '{}'", status)))?;

    Ok(Account {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        platform,
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        expires_at: row.get("expires_at"),
        status,
        is_connected: row.get("is_connected"),
        platform_user_id: row.get("platform_user_id"),
        platform_user_name: row.get("platform_user_name"),
        page_id: row.get("page_id"),
        page_name: row.get("page_name"),
        connected_by: row.get("connected_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
