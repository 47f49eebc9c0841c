use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

#[derive(Debug, Clone)]
pub struct PasswordSignInRequest {
    pub base_url: String,
    pub anon_key: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub base_url: String,
    pub anon_key: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RefreshSessionRequest {
    pub base_url: String,
    pub anon_key: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct SignOutRequest {
    pub base_url: String,
    pub anon_key: String,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub user_id: String,
    pub email: String,
}

/// Outcome of a sign-up call. Backends with email confirmation enabled
/// create the account without returning a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(AuthTokenResponse),
    ConfirmationRequired { email: String },
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn password_sign_in(
        &self,
        request: PasswordSignInRequest,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, InfraError>;

    async fn refresh_session(
        &self,
        request: RefreshSessionRequest,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_out(&self, request: SignOutRequest) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct AuthUserPayload {
    id: Option<String>,
    email: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct AuthTokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: Option<AuthUserPayload>,
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    #[serde(rename = "email")]
    bare_email: Option<String>,
}

impl ReqwestAuthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn auth_endpoint(base_url: &str, action: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::Auth(format!("invalid backend base url: {error}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Auth("backend base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push("auth");
            segments.push("v1");
            segments.push(action);
        }
        Ok(url)
    }

    fn error_from_payload(status: reqwest::StatusCode, payload: &AuthTokenPayload, body: &str) -> InfraError {
        let code = payload
            .error
            .clone()
            .unwrap_or_else(|| format!("http_{}", status.as_u16()));
        let detail = payload
            .error_description
            .clone()
            .or_else(|| payload.msg.clone())
            .unwrap_or_else(|| body.to_string());
        InfraError::Auth(format!("auth endpoint error: {code}; {detail}"))
    }

    async fn post_auth(
        &self,
        url: Url,
        anon_key: &str,
        bearer: Option<&str>,
        json_body: Option<serde_json::Value>,
    ) -> Result<(reqwest::StatusCode, String), InfraError> {
        let mut request = self.client.post(url).header("apikey", anon_key);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = json_body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Auth(format!("network error during auth request: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Auth(format!("failed reading auth response: {error}")))?;
        Ok((status, body))
    }

    fn parse_token_response(status: reqwest::StatusCode, body: &str) -> Result<AuthTokenResponse, InfraError> {
        let payload = serde_json::from_str::<AuthTokenPayload>(body).map_err(|error| {
            InfraError::Auth(format!("invalid auth response payload: {error}; body={body}"))
        })?;

        if !status.is_success() || payload.error.is_some() {
            return Err(Self::error_from_payload(status, &payload, body));
        }

        let access_token = payload
            .access_token
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| InfraError::Auth("auth response did not include access_token".to_string()))?;
        let user = payload.user.as_ref();
        let user_id = user
            .and_then(|user| user.id.clone())
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| InfraError::Auth("auth response did not include user id".to_string()))?;
        let email = user
            .and_then(|user| user.email.clone())
            .unwrap_or_default();

        Ok(AuthTokenResponse {
            access_token,
            refresh_token: payload.refresh_token,
            expires_in: payload.expires_in.unwrap_or(0).max(0),
            user_id,
            email,
        })
    }
}

#[async_trait]
impl AuthClient for ReqwestAuthClient {
    async fn password_sign_in(
        &self,
        request: PasswordSignInRequest,
    ) -> Result<AuthTokenResponse, InfraError> {
        let mut url = Self::auth_endpoint(&request.base_url, "token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let (status, body) = self
            .post_auth(
                url,
                &request.anon_key,
                None,
                Some(serde_json::json!({
                    "email": request.email,
                    "password": request.password,
                })),
            )
            .await?;
        Self::parse_token_response(status, &body)
    }

    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, InfraError> {
        let url = Self::auth_endpoint(&request.base_url, "signup")?;
        let (status, body) = self
            .post_auth(
                url,
                &request.anon_key,
                None,
                Some(serde_json::json!({
                    "email": request.email,
                    "password": request.password,
                })),
            )
            .await?;

        let payload = serde_json::from_str::<AuthTokenPayload>(&body).map_err(|error| {
            InfraError::Auth(format!("invalid sign-up payload: {error}; body={body}"))
        })?;
        if !status.is_success() || payload.error.is_some() {
            return Err(Self::error_from_payload(status, &payload, &body));
        }

        // With email confirmation enabled the backend returns the bare user
        // record instead of a session.
        if payload.access_token.is_none() {
            let email = payload
                .user
                .as_ref()
                .and_then(|user| user.email.clone())
                .or(payload.bare_email)
                .unwrap_or_else(|| request.email.clone());
            return Ok(SignUpOutcome::ConfirmationRequired { email });
        }

        Ok(SignUpOutcome::SignedIn(Self::parse_token_response(
            status, &body,
        )?))
    }

    async fn refresh_session(
        &self,
        request: RefreshSessionRequest,
    ) -> Result<AuthTokenResponse, InfraError> {
        let mut url = Self::auth_endpoint(&request.base_url, "token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");

        let (status, body) = self
            .post_auth(
                url,
                &request.anon_key,
                None,
                Some(serde_json::json!({
                    "refresh_token": request.refresh_token,
                })),
            )
            .await?;
        Self::parse_token_response(status, &body)
    }

    async fn sign_out(&self, request: SignOutRequest) -> Result<(), InfraError> {
        let url = Self::auth_endpoint(&request.base_url, "logout")?;
        let (status, body) = self
            .post_auth(url, &request.anon_key, Some(&request.access_token), None)
            .await?;

        // The backend answers 204; an already-invalid token is not an error
        // worth surfacing on the way out.
        if !status.is_success() && status != reqwest::StatusCode::UNAUTHORIZED {
            return Err(InfraError::Auth(format!(
                "sign-out failed: http {}; body={body}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_endpoint_appends_segments() {
        let url = ReqwestAuthClient::auth_endpoint("https://backend.example.com", "signup")
            .expect("endpoint");
        assert_eq!(url.as_str(), "https://backend.example.com/auth/v1/signup");
    }

    #[test]
    fn auth_endpoint_tolerates_trailing_slash() {
        let url = ReqwestAuthClient::auth_endpoint("https://backend.example.com/", "token")
            .expect("endpoint");
        assert_eq!(url.as_str(), "https://backend.example.com/auth/v1/token");
    }

    #[test]
    fn parse_token_response_extracts_session() {
        let body = serde_json::json!({
            "access_token": "access",
            "refresh_token": "refresh",
            "expires_in": 3600,
            "user": { "id": "usr-1", "email": "student@example.com" }
        })
        .to_string();

        let parsed = ReqwestAuthClient::parse_token_response(reqwest::StatusCode::OK, &body)
            .expect("parse token response");
        assert_eq!(parsed.access_token, "access");
        assert_eq!(parsed.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(parsed.expires_in, 3600);
        assert_eq!(parsed.user_id, "usr-1");
        assert_eq!(parsed.email, "student@example.com");
    }

    #[test]
    fn parse_token_response_surfaces_error_description() {
        let body = serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Invalid login credentials"
        })
        .to_string();

        let result =
            ReqwestAuthClient::parse_token_response(reqwest::StatusCode::BAD_REQUEST, &body);
        match result {
            Err(InfraError::Auth(message)) => {
                assert!(message.contains("invalid_grant"));
                assert!(message.contains("Invalid login credentials"));
            }
            _ => panic!("expected auth error"),
        }
    }
}
