use crate::database::entities::{external_identities, AuthType, ExternalIdentityRecord};
use crate::database::{map_db_err, DatabaseError, DatabaseResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use sea_orm_migration::sea_query::OnConflict;

/// Lookup key for a federated identity as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey<'a> {
    pub provider: &'a str,
    pub external_id: &'a str,
    /// `""` for providers without an issuer
    pub issuer: &'a str,
    pub auth_type: AuthType,
}

#[derive(Clone)]
pub struct ExternalIdentitiesDao {
    db: DatabaseConnection,
}

impl ExternalIdentitiesDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_identity(
        &self,
        key: &IdentityKey<'_>,
    ) -> DatabaseResult<Option<ExternalIdentityRecord>> {
        // Oldest binding wins if two accounts ever claimed the same identity
        external_identities::Entity::find()
            .filter(external_identities::Column::Provider.eq(key.provider))
            .filter(external_identities::Column::ExternalId.eq(key.external_id))
            .filter(external_identities::Column::Issuer.eq(key.issuer))
            .filter(external_identities::Column::AuthType.eq(key.auth_type))
            .order_by_asc(external_identities::Column::Id)
            .one(&self.db)
            .await
            .map_err(map_db_err)
    }

    pub async fn find_binding(
        &self,
        user_id: i32,
        provider: &str,
        issuer: &str,
        auth_type: AuthType,
    ) -> DatabaseResult<Option<ExternalIdentityRecord>> {
        external_identities::Entity::find()
            .filter(external_identities::Column::UserId.eq(user_id))
            .filter(external_identities::Column::Provider.eq(provider))
            .filter(external_identities::Column::Issuer.eq(issuer))
            .filter(external_identities::Column::AuthType.eq(auth_type))
            .one(&self.db)
            .await
            .map_err(map_db_err)
    }

    pub async fn list_by_user(&self, user_id: i32) -> DatabaseResult<Vec<ExternalIdentityRecord>> {
        external_identities::Entity::find()
            .filter(external_identities::Column::UserId.eq(user_id))
            .order_by_asc(external_identities::Column::Id)
            .all(&self.db)
            .await
            .map_err(map_db_err)
    }

    /// Insert or overwrite the binding in the `(user_id, provider, issuer, auth_type)` slot
    pub async fn upsert(
        &self,
        user_id: i32,
        key: &IdentityKey<'_>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<ExternalIdentityRecord> {
        let active_model = external_identities::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: Set(user_id),
            provider: Set(key.provider.to_string()),
            external_id: Set(key.external_id.to_string()),
            issuer: Set(key.issuer.to_string()),
            auth_type: Set(key.auth_type),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let on_conflict = OnConflict::columns([
            external_identities::Column::UserId,
            external_identities::Column::Provider,
            external_identities::Column::Issuer,
            external_identities::Column::AuthType,
        ])
        .update_columns([
            external_identities::Column::ExternalId,
            external_identities::Column::UpdatedAt,
        ])
        .to_owned();

        external_identities::Entity::insert(active_model)
            .on_conflict(on_conflict)
            .exec(&self.db)
            .await
            .map_err(map_db_err)?;

        self.find_binding(user_id, key.provider, key.issuer, key.auth_type)
            .await?
            .ok_or(DatabaseError::NotFound)
    }
}
