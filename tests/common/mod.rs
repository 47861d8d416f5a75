use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use federated_auth::{
    Server,
    auth::{TokenIssuer, config::OAuthProvider},
    database::{DatabaseManager, entities::UserRecord},
    test_utils::TestServerBuilder,
};
use serde_json::Value;
use tower::ServiceExt;

/// Unified test harness that handles app setup and token management
pub struct TestHarness {
    pub server: Server,
    pub app: Router,
}

#[allow(dead_code)]
impl TestHarness {
    pub async fn new() -> Self {
        Self::from_builder(TestServerBuilder::new()).await
    }

    pub async fn with_providers(providers: Vec<(&str, OAuthProvider)>) -> Self {
        let mut builder = TestServerBuilder::new();
        for (name, provider) in providers {
            builder = builder.with_provider(name, provider);
        }
        Self::from_builder(builder).await
    }

    pub async fn from_builder(builder: TestServerBuilder) -> Self {
        let server = builder.build().await;
        let app = server.create_app();
        Self { server, app }
    }

    pub async fn create_user(&self, username: &str, admin: bool) -> UserRecord {
        self.server
            .database
            .users()
            .create(username, admin)
            .await
            .unwrap()
    }

    /// Session token for `user`, as a successful login would issue it
    pub fn token_for(&self, user: &UserRecord) -> String {
        self.server.token_issuer.issue(user).unwrap()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        origin: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri, None, None, None).await
    }
}

/// Read the body as JSON
#[allow(dead_code)]
pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// `Location` of a `302 Found`
#[allow(dead_code)]
pub fn redirect_location(response: &Response) -> String {
    assert_eq!(response.status(), StatusCode::FOUND);
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

#[allow(dead_code)]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
