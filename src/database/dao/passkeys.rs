use crate::database::entities::{passkeys, PasskeyRecord};
use crate::database::{map_db_err, DatabaseError, DatabaseResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

/// Fields of a credential that has just passed registration.
#[derive(Debug, Clone)]
pub struct NewPasskey {
    pub user_id: i32,
    pub credential_id: String,
    pub credential_json: String,
    pub public_key: String,
    pub sign_count: i64,
    pub device_name: String,
    pub aaguid: String,
}

#[derive(Clone)]
pub struct PasskeysDao {
    db: DatabaseConnection,
}

impl PasskeysDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        passkey: NewPasskey,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PasskeyRecord> {
        let active_model = passkeys::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: Set(passkey.user_id),
            credential_id: Set(passkey.credential_id),
            credential_json: Set(passkey.credential_json),
            public_key: Set(passkey.public_key),
            sign_count: Set(passkey.sign_count),
            last_used_at: Set(None),
            device_name: Set(passkey.device_name),
            aaguid: Set(passkey.aaguid),
            created_at: Set(now),
        };

        active_model.insert(&self.db).await.map_err(map_db_err)
    }

    pub async fn list_by_user(&self, user_id: i32) -> DatabaseResult<Vec<PasskeyRecord>> {
        passkeys::Entity::find()
            .filter(passkeys::Column::UserId.eq(user_id))
            .order_by_asc(passkeys::Column::Id)
            .all(&self.db)
            .await
            .map_err(map_db_err)
    }

    pub async fn find_by_credential_id(
        &self,
        credential_id: &str,
    ) -> DatabaseResult<Option<PasskeyRecord>> {
        passkeys::Entity::find()
            .filter(passkeys::Column::CredentialId.eq(credential_id))
            .one(&self.db)
            .await
            .map_err(map_db_err)
    }

    pub async fn find_by_id(&self, id: i32) -> DatabaseResult<Option<PasskeyRecord>> {
        passkeys::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err)
    }

    /// Compare-and-swap on `sign_count`: returns `false` when another login moved the
    /// counter after `expected_count` was read.
    pub async fn update_usage(
        &self,
        id: i32,
        expected_count: i64,
        new_count: i64,
        used_at: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = passkeys::Entity::update_many()
            .col_expr(
                passkeys::Column::SignCount,
                sea_orm::sea_query::Expr::value(new_count),
            )
            .col_expr(
                passkeys::Column::LastUsedAt,
                sea_orm::sea_query::Expr::value(Some(used_at)),
            )
            .filter(passkeys::Column::Id.eq(id))
            .filter(passkeys::Column::SignCount.eq(expected_count))
            .exec(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(result.rows_affected == 1)
    }

    pub async fn update_device_name(
        &self,
        id: i32,
        device_name: &str,
    ) -> DatabaseResult<PasskeyRecord> {
        let active_model = passkeys::ActiveModel {
            id: Set(id),
            device_name: Set(device_name.to_string()),
            ..Default::default()
        };

        active_model.update(&self.db).await.map_err(|e| match e {
            sea_orm::DbErr::RecordNotUpdated => DatabaseError::NotFound,
            other => map_db_err(other),
        })
    }

    pub async fn delete(&self, id: i32) -> DatabaseResult<()> {
        let result = passkeys::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(map_db_err)?;

        if result.rows_affected == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }
}
