//! Custom Axum extractors.
//!
//! - [`Caller`]: the user the request acts for, asserted upstream
//! - [`ClientIp`]: client address for audit events
//! - [`CorrelationId`]: the id assigned by [`crate::middleware`]
//! - [`ApiJson`]: JSON body whose rejections use the [`AppError`] shape

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    Json, async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::{HeaderMap, request::Parts},
};
use rifa_core::types::UserId;
use serde::de::DeserializeOwned;
use std::net::{IpAddr, Ipv4Addr};
use uuid::Uuid;

/// Header carrying the authenticated user id.
///
/// Authentication happens in front of this service; the gateway that
/// terminates it forwards the user id here.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The authenticated user making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing user identity"))?;

        raw.to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(|id| Self(UserId::from_uuid(id)))
            .ok_or_else(|| AppError::unauthorized("Malformed user identity"))
    }
}

/// Correlation ID for request tracing.
///
/// Reads the id stored by the correlation middleware, then the
/// `X-Correlation-ID` header, and generates one as a last resort.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts.extensions.get::<Uuid>().copied().unwrap_or_else(|| {
            parts
                .headers
                .get(CORRELATION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_else(Uuid::new_v4)
        });
        Ok(Self(id))
    }
}

/// Client IP address.
///
/// Priority: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// loopback address.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(client_ip(&parts.headers)))
    }
}

fn client_ip(headers: &HeaderMap) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded
        .or_else(|| {
            headers
                .get("X-Real-IP")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// JSON body extractor answering malformed bodies with a 400 [`AppError`].
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn caller_comes_from_the_user_header() {
        let id = Uuid::new_v4();
        let mut parts = parts(Request::builder().header(USER_ID_HEADER, id.to_string()));
        let Caller(user) = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user, UserId::from_uuid(id));
    }

    #[tokio::test]
    async fn missing_or_malformed_identity_is_unauthorized() {
        let mut missing = parts(Request::builder());
        let err = Caller::from_request_parts(&mut missing, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let mut malformed = parts(Request::builder().header(USER_ID_HEADER, "alice"));
        let err = Caller::from_request_parts(&mut malformed, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("X-Real-IP", "198.51.100.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7".parse::<IpAddr>().unwrap());

        headers.remove("X-Forwarded-For");
        assert_eq!(client_ip(&headers), "198.51.100.2".parse::<IpAddr>().unwrap());

        assert_eq!(client_ip(&HeaderMap::new()), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn correlation_id_prefers_the_middleware_value() {
        let assigned = Uuid::new_v4();
        let mut parts = parts(Request::builder().header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string()));
        parts.extensions.insert(assigned);
        let CorrelationId(id) = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, assigned);
    }
}
