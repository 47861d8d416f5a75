//! OAuth 2.0 / OIDC login and account binding.
//!
//! The authorize leg is stateless: everything the callback needs travels in the
//! signed `state` parameter.

pub mod binder;
pub mod providers;
pub mod service;
pub mod state;

pub use binder::{IdentityBinder, Resolution};
pub use providers::{
    build_http_client, create_adapter, get_display_name, ExternalIdentity, ProviderAdapter,
    ProviderTokens,
};
pub use service::{BindingInfo, OAuthService, ProviderInfo, ProvidersResponse};
pub use state::{OAuthAction, OAuthState, StateError, StateTokenCodec, OAUTH_STATE_TTL_SECONDS};
