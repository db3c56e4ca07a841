use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use std::future::{Ready, ready};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::ApiError;

/// Caller presented the configured admin bearer token.
#[derive(Debug)]
pub struct AdminAuth;

impl FromRequest for AdminAuth {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_admin(req))
    }
}

fn extract_admin(req: &HttpRequest) -> Result<AdminAuth, ApiError> {
    let config = req.app_data::<Data<Config>>().ok_or(ApiError::Internal)?;

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let matches: bool = token
        .trim()
        .as_bytes()
        .ct_eq(config.admin_token.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::Unauthorized);
    }
    Ok(AdminAuth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use test_case::test_case;

    fn request(header: Option<&str>) -> HttpRequest {
        let config = Config {
            database_url: String::new(),
            bind_addr: String::new(),
            admin_token: "s3cret".into(),
            database_max_connections: 1,
        };
        let mut req = TestRequest::default().app_data(Data::new(config));
        if let Some(value) = header {
            req = req.insert_header(("Authorization", value));
        }
        req.to_http_request()
    }

    #[test_case(Some("Bearer s3cret"), true ; "exact token")]
    #[test_case(Some("Bearer s3cret "), true ; "trailing whitespace")]
    #[test_case(Some("Bearer s3creT"), false ; "one byte differs")]
    #[test_case(Some("Bearer s3cret-and-more"), false ; "longer token")]
    #[test_case(Some("Bearer s3"), false ; "prefix of token")]
    #[test_case(Some("Bearer "), false ; "empty token")]
    #[test_case(Some("s3cret"), false ; "missing scheme")]
    #[test_case(None, false ; "no header")]
    fn test_admin_token(header: Option<&str>, accepted: bool) {
        let result = extract_admin(&request(header));
        assert_eq!(result.is_ok(), accepted);
        if !accepted {
            assert!(matches!(result, Err(ApiError::Unauthorized)));
        }
    }

    #[test]
    fn test_missing_config_is_internal() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_http_request();
        assert!(matches!(extract_admin(&req), Err(ApiError::Internal)));
    }
}
