use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A registered WebAuthn credential.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "passkeys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    /// base64url (no padding) of the raw credential id
    #[sea_orm(unique)]
    pub credential_id: String,
    /// JSON of the verified credential (algorithm, transports, flags)
    #[sea_orm(column_type = "Text")]
    pub credential_json: String,
    /// base64url of the COSE public key
    #[sea_orm(column_type = "Text")]
    pub public_key: String,
    pub sign_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub device_name: String,
    pub aaguid: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
