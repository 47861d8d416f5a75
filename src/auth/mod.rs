pub mod config;
pub mod jwt;
pub mod middleware;
pub mod oauth;
pub mod oidc;
pub mod passkey;

pub use jwt::{JwtTokenIssuer, SessionClaims, TokenIssuer};
pub use middleware::{auth_middleware, UserExtractor};
