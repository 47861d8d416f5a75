use super::{ExternalIdentities, Users};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExternalIdentities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExternalIdentities::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::Provider)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::ExternalId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::Issuer)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::AuthType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExternalIdentities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_identities_user_id")
                            .from(ExternalIdentities::Table, ExternalIdentities::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One binding per account and provider slot; rebinding overwrites external_id
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_external_identities_binding")
                    .table(ExternalIdentities::Table)
                    .col(ExternalIdentities::UserId)
                    .col(ExternalIdentities::Provider)
                    .col(ExternalIdentities::Issuer)
                    .col(ExternalIdentities::AuthType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Login lookup
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_external_identities_lookup")
                    .table(ExternalIdentities::Table)
                    .col(ExternalIdentities::Provider)
                    .col(ExternalIdentities::ExternalId)
                    .col(ExternalIdentities::Issuer)
                    .col(ExternalIdentities::AuthType)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExternalIdentities::Table).to_owned())
            .await
    }
}
