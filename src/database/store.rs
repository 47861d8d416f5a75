use super::dao::{IdentityKey, NewPasskey};
use super::entities::{AuthType, ExternalIdentityRecord, PasskeyRecord, UserRecord};
use super::{DatabaseManager, DatabaseManagerImpl, DatabaseResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Accounts and their federated identity bindings.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, user_id: i32) -> DatabaseResult<Option<UserRecord>>;

    async fn find_by_external_identity(
        &self,
        key: &IdentityKey<'_>,
    ) -> DatabaseResult<Option<ExternalIdentityRecord>>;

    async fn upsert_external_identity(
        &self,
        user_id: i32,
        key: &IdentityKey<'_>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ExternalIdentityRecord>;

    async fn find_binding(
        &self,
        user_id: i32,
        provider: &str,
        issuer: &str,
        auth_type: AuthType,
    ) -> DatabaseResult<Option<ExternalIdentityRecord>>;
}

/// Registered WebAuthn credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create(&self, passkey: NewPasskey, now: DateTime<Utc>)
        -> DatabaseResult<PasskeyRecord>;

    async fn list_by_user(&self, user_id: i32) -> DatabaseResult<Vec<PasskeyRecord>>;

    async fn get_by_credential_id(&self, credential_id: &str)
        -> DatabaseResult<Option<PasskeyRecord>>;

    async fn get_by_id(&self, id: i32) -> DatabaseResult<Option<PasskeyRecord>>;

    /// Store a new counter only if the stored one still equals `expected_count`.
    async fn update_usage(
        &self,
        id: i32,
        expected_count: i64,
        new_count: i64,
        used_at: DateTime<Utc>,
    ) -> DatabaseResult<bool>;

    async fn update_device_name(&self, id: i32, device_name: &str)
        -> DatabaseResult<PasskeyRecord>;

    async fn delete(&self, id: i32) -> DatabaseResult<()>;
}

#[async_trait]
impl UserStore for DatabaseManagerImpl {
    async fn get_by_id(&self, user_id: i32) -> DatabaseResult<Option<UserRecord>> {
        self.users().find_by_id(user_id).await
    }

    async fn find_by_external_identity(
        &self,
        key: &IdentityKey<'_>,
    ) -> DatabaseResult<Option<ExternalIdentityRecord>> {
        self.external_identities().find_by_identity(key).await
    }

    async fn upsert_external_identity(
        &self,
        user_id: i32,
        key: &IdentityKey<'_>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ExternalIdentityRecord> {
        self.external_identities().upsert(user_id, key, now).await
    }

    async fn find_binding(
        &self,
        user_id: i32,
        provider: &str,
        issuer: &str,
        auth_type: AuthType,
    ) -> DatabaseResult<Option<ExternalIdentityRecord>> {
        self.external_identities()
            .find_binding(user_id, provider, issuer, auth_type)
            .await
    }
}

#[async_trait]
impl CredentialStore for DatabaseManagerImpl {
    async fn create(
        &self,
        passkey: NewPasskey,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PasskeyRecord> {
        self.passkeys().create(passkey, now).await
    }

    async fn list_by_user(&self, user_id: i32) -> DatabaseResult<Vec<PasskeyRecord>> {
        self.passkeys().list_by_user(user_id).await
    }

    async fn get_by_credential_id(
        &self,
        credential_id: &str,
    ) -> DatabaseResult<Option<PasskeyRecord>> {
        self.passkeys().find_by_credential_id(credential_id).await
    }

    async fn get_by_id(&self, id: i32) -> DatabaseResult<Option<PasskeyRecord>> {
        self.passkeys().find_by_id(id).await
    }

    async fn update_usage(
        &self,
        id: i32,
        expected_count: i64,
        new_count: i64,
        used_at: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        self.passkeys()
            .update_usage(id, expected_count, new_count, used_at)
            .await
    }

    async fn update_device_name(
        &self,
        id: i32,
        device_name: &str,
    ) -> DatabaseResult<PasskeyRecord> {
        self.passkeys().update_device_name(id, device_name).await
    }

    async fn delete(&self, id: i32) -> DatabaseResult<()> {
        self.passkeys().delete(id).await
    }
}
