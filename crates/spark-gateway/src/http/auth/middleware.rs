//! The builtin authentication middlewares.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName};
use regex::Regex;
use snafu::ResultExt;

use crate::{
    config::{
        HeaderAuthConfig, MiddlewareConfig, RegexAllowConfig, RegexDenyConfig,
        ServiceTokenAuthConfig,
    },
    http::auth::{
        AuthError, DeniedSnafu, InvalidHeaderNameSnafu, InvalidRegexSnafu,
        MissingServiceTokenSnafu, NotAllowedSnafu, Result, TokenMismatchSnafu,
        UnknownServiceUserSnafu, basic_user,
    },
};

const SERVICE_USER_HEADER: &str = "x-spark-gateway-user";
const SERVICE_TOKEN_HEADER: &str = "x-spark-gateway-token";

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).context(InvalidRegexSnafu { pattern }))
        .collect()
}

/// A builtin middleware, constructed (and thereby validated) from its config
/// blob. The set is closed; new middlewares are added here.
#[derive(Debug)]
pub enum AuthMiddleware {
    RegexAllow(RegexAllow),
    RegexDeny(RegexDeny),
    HeaderAuth(HeaderAuth),
    ServiceTokenAuth(ServiceTokenAuth),
}

impl AuthMiddleware {
    pub fn from_config(config: &MiddlewareConfig) -> Result<Self> {
        let middleware = match config {
            MiddlewareConfig::RegexAllow(config) => {
                AuthMiddleware::RegexAllow(RegexAllow::from_config(config)?)
            }
            MiddlewareConfig::RegexDeny(config) => {
                AuthMiddleware::RegexDeny(RegexDeny::from_config(config)?)
            }
            MiddlewareConfig::HeaderAuth(config) => {
                AuthMiddleware::HeaderAuth(HeaderAuth::from_config(config)?)
            }
            MiddlewareConfig::ServiceTokenAuth(config) => {
                AuthMiddleware::ServiceTokenAuth(ServiceTokenAuth::from_config(config)?)
            }
        };

        Ok(middleware)
    }

    /// Runs the middleware. A middleware either resolves (or overrides) the
    /// user, rejects the request, or leaves the user untouched.
    pub fn apply(&self, headers: &HeaderMap, user: &mut Option<String>) -> Result<()> {
        match self {
            AuthMiddleware::RegexAllow(middleware) => middleware.apply(headers, user),
            AuthMiddleware::RegexDeny(middleware) => middleware.apply(headers),
            AuthMiddleware::HeaderAuth(middleware) => middleware.apply(headers, user),
            AuthMiddleware::ServiceTokenAuth(middleware) => middleware.apply(headers, user),
        }
    }
}

/// Resolves the basic auth user if it matches at least one allow pattern;
/// rejects it otherwise. Requests without basic auth pass through.
#[derive(Debug)]
pub struct RegexAllow {
    allow: Vec<Regex>,
}

impl RegexAllow {
    pub fn from_config(config: &RegexAllowConfig) -> Result<Self> {
        Ok(Self {
            allow: compile_all(&config.allow)?,
        })
    }

    fn apply(&self, headers: &HeaderMap, user: &mut Option<String>) -> Result<()> {
        let Some(candidate) = basic_user(headers)? else {
            return Ok(());
        };

        if self.allow.iter().any(|regex| regex.is_match(&candidate)) {
            *user = Some(candidate);
            return Ok(());
        }

        NotAllowedSnafu { user: candidate }.fail()
    }
}

/// Rejects basic auth users matching any deny pattern. Everything else
/// passes through untouched.
#[derive(Debug)]
pub struct RegexDeny {
    deny: Vec<Regex>,
}

impl RegexDeny {
    pub fn from_config(config: &RegexDenyConfig) -> Result<Self> {
        Ok(Self {
            deny: compile_all(&config.deny)?,
        })
    }

    fn apply(&self, headers: &HeaderMap) -> Result<()> {
        // Undecodable credentials cannot match a deny pattern.
        let Ok(Some(candidate)) = basic_user(headers) else {
            return Ok(());
        };

        if self.deny.iter().any(|regex| regex.is_match(&candidate)) {
            return DeniedSnafu { user: candidate }.fail();
        }

        Ok(())
    }
}

/// Resolves the user from the first configured header whose value is
/// non-empty and matches its validation regex.
#[derive(Debug)]
pub struct HeaderAuth {
    headers: Vec<(HeaderName, Regex)>,
}

impl HeaderAuth {
    pub fn from_config(config: &HeaderAuthConfig) -> Result<Self> {
        let headers = config
            .headers
            .iter()
            .map(|header| {
                let name = header
                    .header
                    .parse::<HeaderName>()
                    .context(InvalidHeaderNameSnafu {
                        header: header.header.clone(),
                    })?;
                let regex = Regex::new(&header.validation_regex).context(InvalidRegexSnafu {
                    pattern: header.validation_regex.clone(),
                })?;

                Ok((name, regex))
            })
            .collect::<Result<_>>()?;

        Ok(Self { headers })
    }

    fn apply(&self, headers: &HeaderMap, user: &mut Option<String>) -> Result<()> {
        for (name, regex) in &self.headers {
            let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) else {
                continue;
            };

            if !value.is_empty() && regex.is_match(value) {
                *user = Some(value.to_owned());
                break;
            }
        }

        Ok(())
    }
}

/// Authenticates service accounts via a shared token header pair, validated
/// against a configured user to token map.
#[derive(Debug)]
pub struct ServiceTokenAuth {
    tokens: BTreeMap<String, String>,
}

impl ServiceTokenAuth {
    pub fn from_config(config: &ServiceTokenAuthConfig) -> Result<Self> {
        Ok(Self {
            tokens: config.tokens.clone(),
        })
    }

    fn apply(&self, headers: &HeaderMap, user: &mut Option<String>) -> Result<()> {
        let Some(candidate) = headers
            .get(SERVICE_USER_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(());
        };

        let Some(token) = headers
            .get(SERVICE_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return MissingServiceTokenSnafu {
                header: SERVICE_USER_HEADER,
                token_header: SERVICE_TOKEN_HEADER,
            }
            .fail();
        };

        match self.tokens.get(candidate) {
            None => UnknownServiceUserSnafu { user: candidate }.fail(),
            Some(expected) if expected == token => {
                *user = Some(candidate.to_owned());
                Ok(())
            }
            Some(_) => TokenMismatchSnafu { user: candidate }.fail(),
        }
    }
}

#[cfg(test)]
mod test {
    use axum::http::HeaderValue;
    use rstest::rstest;

    use super::*;
    use crate::error::ErrorKind;

    fn service_token_auth() -> ServiceTokenAuth {
        ServiceTokenAuth::from_config(&ServiceTokenAuthConfig {
            tokens: [("airflow".to_owned(), "sekrit".to_owned())].into(),
        })
        .expect("middleware builds")
    }

    #[test]
    fn service_token_passes_through_without_user_header() {
        let middleware = service_token_auth();
        let mut user = None;

        middleware
            .apply(&HeaderMap::new(), &mut user)
            .expect("absent headers pass through");
        assert_eq!(user, None);
    }

    #[rstest]
    #[case::valid("airflow", Some("sekrit"), None, Some("airflow"))]
    #[case::missing_token("airflow", None, Some(ErrorKind::Unauthorized), None)]
    #[case::wrong_token("airflow", Some("wrong"), Some(ErrorKind::Unauthorized), None)]
    #[case::unknown_user("spinach", Some("sekrit"), Some(ErrorKind::Forbidden), None)]
    fn service_token_paths(
        #[case] user_header: &str,
        #[case] token_header: Option<&str>,
        #[case] expected_error: Option<ErrorKind>,
        #[case] expected_user: Option<&str>,
    ) {
        let middleware = service_token_auth();

        let mut headers = HeaderMap::new();
        headers.insert(
            SERVICE_USER_HEADER,
            HeaderValue::from_str(user_header).expect("valid header value"),
        );
        if let Some(token) = token_header {
            headers.insert(
                SERVICE_TOKEN_HEADER,
                HeaderValue::from_str(token).expect("valid header value"),
            );
        }

        let mut user = None;
        let result = middleware.apply(&headers, &mut user);

        match expected_error {
            Some(kind) => assert_eq!(result.unwrap_err().kind(), kind),
            None => result.expect("authentication succeeds"),
        }
        assert_eq!(user.as_deref(), expected_user);
    }

    #[test]
    fn header_auth_respects_order() {
        let middleware = HeaderAuth::from_config(&HeaderAuthConfig {
            headers: vec![
                crate::config::UserHeaderConfig {
                    header: "X-Primary-User".to_owned(),
                    validation_regex: "^[a-z]+$".to_owned(),
                },
                crate::config::UserHeaderConfig {
                    header: "X-Secondary-User".to_owned(),
                    validation_regex: "^[a-z]+$".to_owned(),
                },
            ],
        })
        .expect("middleware builds");

        let mut headers = HeaderMap::new();
        headers.insert("X-Primary-User", HeaderValue::from_static("alice"));
        headers.insert("X-Secondary-User", HeaderValue::from_static("bob"));

        let mut user = None;
        middleware
            .apply(&headers, &mut user)
            .expect("authentication succeeds");
        assert_eq!(user.as_deref(), Some("alice"));
    }

    #[test]
    fn regex_deny_rejects_matching_users() {
        let middleware = RegexDeny::from_config(&RegexDenyConfig {
            deny: vec!["^blocked-".to_owned()],
        })
        .expect("middleware builds");

        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            "blocked-user:pw",
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).expect("valid header value"),
        );

        let error = middleware.apply(&headers).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn invalid_regex_fails_construction() {
        let error = RegexAllow::from_config(&RegexAllowConfig {
            allow: vec!["[unclosed".to_owned()],
        })
        .unwrap_err();

        assert!(matches!(error, AuthError::InvalidRegex { .. }));
    }
}
