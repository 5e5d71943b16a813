//! Common test utilities for E2E tests

use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;
use usos_login::{AppState, config};
use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REQUEST_TOKEN: &str = "request-token";
pub const ACCESS_TOKEN: &str = "access-token";
pub const VERIFIER: &str = "24680";

/// Test server instance backed by a mock USOS provider
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub usos: MockServer,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let usos = MockServer::start().await;

        // Bind first so the public URL carries the real port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                public_url: addr_str.clone(),
            },
            database: config::DatabaseConfig {
                url: format!("sqlite:{}", db_path.display()),
            },
            auth: config::AuthConfig {
                secret_key: "test-secret-key-that-is-32-bytes!".to_string(),
                session_max_age: 3600,
            },
            usos: config::UsosConfig {
                consumer_key: "test-consumer-key".to_string(),
                consumer_secret: "test-consumer-secret".to_string(),
                base_url: format!("{}/", usos.uri()),
                scopes: vec!["email".to_string(), "studies".to_string()],
                timeout_seconds: 5,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let app = usos_login::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            usos,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// GET `path`, sending the session cookie if one is given
    pub async fn get(&self, path: &str, session: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(session) = session {
            request = request.header(COOKIE, session);
        }
        request.send().await.unwrap()
    }

    /// Mount the request-token leg; `expected_calls` is verified on drop
    pub async fn mock_request_token(&self, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/services/oauth/request_token"))
            .and(header_exists("authorization"))
            .and(body_string_contains("scopes=email%7Cstudies"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "oauth_token={REQUEST_TOKEN}&oauth_token_secret=request-secret&oauth_callback_confirmed=true"
            )))
            .expect(expected_calls)
            .mount(&self.usos)
            .await;
    }

    /// Mount the access-token leg
    pub async fn mock_access_token(&self) {
        Mock::given(method("POST"))
            .and(path("/services/oauth/access_token"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "oauth_token={ACCESS_TOKEN}&oauth_token_secret=access-secret"
            )))
            .mount(&self.usos)
            .await;
    }

    /// Mount the profile endpoint answering with `profile`
    pub async fn mock_profile(&self, profile: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/services/users/user"))
            .and(query_param(
                "fields",
                "id|first_name|last_name|email|student_number|student_programmes",
            ))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile))
            .mount(&self.usos)
            .await;
    }

    /// Start the handshake and return the session cookie
    pub async fn begin_login(&self, next: &str) -> String {
        let response = self
            .get(&format!("/authorize?next={}", urlencoding::encode(next)), None)
            .await;
        assert!(response.status().is_redirection());
        session_cookie(&response).expect("session cookie")
    }

    /// Full sign-in through the mocked provider; returns the session cookie
    /// issued after sign-in
    pub async fn log_in(&self, profile: serde_json::Value) -> String {
        self.mock_request_token(1).await;
        self.mock_access_token().await;
        self.mock_profile(profile).await;

        let session = self.begin_login("/").await;
        let response = self
            .get(
                &format!("/oauth-authorized?oauth_token={REQUEST_TOKEN}&oauth_verifier={VERIFIER}"),
                Some(&session),
            )
            .await;
        assert!(response.status().is_redirection());
        session_cookie(&response).expect("session cookie after sign-in")
    }
}

/// USOS profile payload
pub fn profile(id: &str, first_name: &str, last_name: &str) -> serde_json::Value {
    json!({
        "id": id,
        "first_name": first_name,
        "last_name": last_name,
        "email": "a@x.pl",
        "student_number": "S123",
        "student_programmes": []
    })
}

/// `session=...` pair from the response's Set-Cookie headers
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .find(|pair| pair.starts_with("session="))
        .map(ToString::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}
