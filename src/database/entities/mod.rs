pub mod external_identities;
pub mod passkeys;
pub mod users;

pub use external_identities::AuthType;
pub use external_identities::Entity as ExternalIdentities;
pub use passkeys::Entity as Passkeys;
pub use users::Entity as Users;

pub type UserRecord = users::Model;
pub type ExternalIdentityRecord = external_identities::Model;
pub type PasskeyRecord = passkeys::Model;
