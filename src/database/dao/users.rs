use crate::database::entities::{users, UserRecord};
use crate::database::{map_db_err, DatabaseError, DatabaseResult};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

#[derive(Clone)]
pub struct UsersDao {
    db: DatabaseConnection,
}

impl UsersDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, username: &str, is_admin: bool) -> DatabaseResult<UserRecord> {
        let now = Utc::now();
        let active_model = users::ActiveModel {
            id: ActiveValue::NotSet,
            username: Set(username.to_string()),
            is_admin: Set(is_admin),
            created_at: Set(now),
            updated_at: Set(now),
        };

        active_model.insert(&self.db).await.map_err(map_db_err)
    }

    pub async fn find_by_id(&self, user_id: i32) -> DatabaseResult<Option<UserRecord>> {
        users::Entity::find_by_id(user_id)
            .one(&self.db)
            .await
            .map_err(map_db_err)
    }

    pub async fn find_by_username(&self, username: &str) -> DatabaseResult<Option<UserRecord>> {
        users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.db)
            .await
            .map_err(map_db_err)
    }

    pub async fn set_admin(&self, user_id: i32, is_admin: bool) -> DatabaseResult<UserRecord> {
        let active_model = users::ActiveModel {
            id: Set(user_id),
            is_admin: Set(is_admin),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };

        active_model.update(&self.db).await.map_err(|e| match e {
            sea_orm::DbErr::RecordNotUpdated => DatabaseError::NotFound,
            other => map_db_err(other),
        })
    }
}
