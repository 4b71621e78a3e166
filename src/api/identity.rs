//! Caller identity extractors.
//!
//! Authentication happens upstream; the authenticating proxy forwards the
//! resolved player in `x-user-id` and the operator in `x-admin-id`.

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use crate::domain::{AdminId, UserId};
use crate::error::EngineError;

/// Header carrying the authenticated player.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the authenticated operator.
pub const ADMIN_HEADER: &str = "x-admin-id";

/// Authenticated player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity(pub UserId);

/// Authenticated operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminIdentity(pub AdminId);

fn header_id<T: std::str::FromStr>(parts: &Parts, name: &str) -> Result<Option<T>, EngineError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| EngineError::Unauthorized(format!("malformed {name} header")))
}

impl<S: Send + Sync> FromRequestParts<S> for UserIdentity {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, USER_HEADER)?
            .map(Self)
            .ok_or_else(|| EngineError::Unauthorized(format!("missing {USER_HEADER} header")))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for UserIdentity {
    type Rejection = EngineError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(header_id(parts, USER_HEADER)?.map(Self))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AdminIdentity {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, ADMIN_HEADER)?
            .map(Self)
            .ok_or_else(|| EngineError::Unauthorized(format!("missing {ADMIN_HEADER} header")))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<(&str, &str)>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let Ok(request) = builder.body(()) else {
            panic!("request builds");
        };
        request.into_parts().0
    }

    #[tokio::test]
    async fn user_header_is_required_and_parsed() {
        let user = UserId::new();
        let mut ok = parts(Some((USER_HEADER, &user.to_string())));
        let Ok(UserIdentity(found)) =
            <UserIdentity as FromRequestParts<()>>::from_request_parts(&mut ok, &()).await
        else {
            panic!("identity expected");
        };
        assert_eq!(found, user);

        let mut missing = parts(None);
        assert!(matches!(
            <UserIdentity as FromRequestParts<()>>::from_request_parts(&mut missing, &()).await,
            Err(EngineError::Unauthorized(_))
        ));

        let mut garbage = parts(Some((ADMIN_HEADER, "not-a-uuid")));
        assert!(matches!(
            <AdminIdentity as FromRequestParts<()>>::from_request_parts(&mut garbage, &()).await,
            Err(EngineError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn optional_user_may_be_absent() {
        let mut none = parts(None);
        let Ok(found) =
            <UserIdentity as OptionalFromRequestParts<()>>::from_request_parts(&mut none, &()).await
        else {
            panic!("absent header is fine");
        };
        assert!(found.is_none());
    }
}
