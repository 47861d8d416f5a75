pub mod external_identities;
pub mod passkeys;
pub mod users;

pub use external_identities::{ExternalIdentitiesDao, IdentityKey};
pub use passkeys::{NewPasskey, PasskeysDao};
pub use users::UsersDao;
