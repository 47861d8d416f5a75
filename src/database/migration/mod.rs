use sea_orm_migration::prelude::*;

pub use sea_orm_migration::MigratorTrait;

mod m20250101_000001_create_users_table;
mod m20250101_000002_create_external_identities_table;
mod m20250101_000003_create_passkeys_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_users_table::Migration),
            Box::new(m20250101_000002_create_external_identities_table::Migration),
            Box::new(m20250101_000003_create_passkeys_table::Migration),
        ]
    }
}

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    Username,
    IsAdmin,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ExternalIdentities {
    Table,
    Id,
    UserId,
    Provider,
    ExternalId,
    Issuer,
    AuthType,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Passkeys {
    Table,
    Id,
    UserId,
    CredentialId,
    CredentialJson,
    PublicKey,
    SignCount,
    LastUsedAt,
    DeviceName,
    Aaguid,
    CreatedAt,
}
