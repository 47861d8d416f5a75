use crate::error::AppError;
use axum::http::{header, HeaderMap};
use url::Url;

/// Origin a ceremony is bound to and the RP ID derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub origin: String,
    pub rp_id: String,
}

impl RelyingParty {
    fn from_url(url: &Url) -> Option<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let origin = url.origin().ascii_serialization();
        Some(Self {
            origin,
            rp_id: host,
        })
    }
}

/// `Origin`, then the scheme and host of `Referer`, then `X-Forwarded-Proto` + `Host`.
pub fn relying_party_from_headers(headers: &HeaderMap) -> Result<RelyingParty, AppError> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(origin) = text(header::ORIGIN.as_str()).filter(|o| *o != "null") {
        if let Some(rp) = Url::parse(origin).ok().as_ref().and_then(RelyingParty::from_url) {
            return Ok(rp);
        }
    }

    if let Some(referer) = text(header::REFERER.as_str()) {
        if let Some(rp) = Url::parse(referer).ok().as_ref().and_then(RelyingParty::from_url) {
            return Ok(rp);
        }
    }

    if let Some(host) = text(header::HOST.as_str()) {
        let proto = text("x-forwarded-proto")
            .and_then(|p| p.split(',').next())
            .map(str::trim)
            .unwrap_or("http");
        if let Some(rp) = Url::parse(&format!("{}://{}", proto, host))
            .ok()
            .as_ref()
            .and_then(RelyingParty::from_url)
        {
            return Ok(rp);
        }
    }

    Err(AppError::Validation(
        "cannot determine the request origin".to_string(),
    ))
}
