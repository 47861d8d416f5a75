pub mod health;
pub mod oauth;
pub mod passkey;

pub use health::create_health_routes;
pub use oauth::{create_oauth_routes, create_protected_oauth_routes};
pub use passkey::{create_passkey_routes, create_protected_passkey_routes};
