//! E2E tests for sign-in with USOS

mod common;

use common::{ACCESS_TOKEN, REQUEST_TOKEN, TestServer, VERIFIER, location, profile};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_landing_page_offers_sign_in() {
    let server = TestServer::new().await;

    let response = server.get("/", None).await;

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("Sign in with USOS"));
}

#[tokio::test]
async fn test_authorize_redirects_to_usos_consent_page() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;

    let response = server.get("/authorize?next=%2Fgrades", None).await;

    assert!(response.status().is_redirection());
    let location = location(&response);
    assert_eq!(
        location,
        format!(
            "{}/services/oauth/authorize?oauth_token={REQUEST_TOKEN}",
            server.usos.uri()
        )
    );

    let requests = server.usos.received_requests().await.unwrap();
    let authorization = requests[0]
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(authorization.starts_with("OAuth "));
    assert!(authorization.contains(r#"oauth_consumer_key="test-consumer-key""#));
    assert!(authorization.contains("oauth_callback="));
    assert!(authorization.contains("oauth-authorized%3Fnext%3D%252Fgrades"));
}

#[tokio::test]
async fn test_full_login_creates_user_and_redirects_to_next() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;
    server.mock_access_token().await;
    server.mock_profile(profile("42", "Ana", "Kowalska")).await;

    let session = server.begin_login("/grades").await;
    let response = server
        .get(
            &format!(
                "/oauth-authorized?oauth_token={REQUEST_TOKEN}&oauth_verifier={VERIFIER}&next=%2Fgrades"
            ),
            Some(&session),
        )
        .await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/grades");
    let signed_in = common::session_cookie(&response).expect("session cookie");
    assert_ne!(signed_in, session);

    let user = server
        .state
        .db
        .find_user_by_usos_id(42)
        .await
        .unwrap()
        .expect("user created");
    assert_eq!(user.first_name, "Ana");
    assert_eq!(user.last_name, "Kowalska");
    assert_eq!(user.email, "a@x.pl");
    assert_eq!(user.student_number.as_deref(), Some("S123"));

    let profile_request = server
        .usos
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|request| request.url.path() == "/services/users/user")
        .expect("profile requested");
    let authorization = profile_request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(authorization.contains(&format!(r#"oauth_token="{ACCESS_TOKEN}""#)));

    let page = server.get("/", Some(&signed_in)).await.text().await.unwrap();
    assert!(page.contains("You were signed in as Ana Kowalska"));
    assert!(page.contains("Signed in as Ana Kowalska (a@x.pl)"));
    assert!(page.contains("Log out"));
}

#[tokio::test]
async fn test_second_login_updates_changed_fields_only() {
    let server = TestServer::new().await;
    server.log_in(profile("42", "Ana", "Kowalska")).await;
    let created = server
        .state
        .db
        .find_user_by_usos_id(42)
        .await
        .unwrap()
        .unwrap();

    server.usos.reset().await;
    server.log_in(profile("42", "Ana", "Nowak")).await;

    let updated = server
        .state
        .db
        .find_user_by_usos_id(42)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.last_name, "Nowak");
    assert_eq!(updated.first_name, "Ana");
    assert_eq!(updated.email, created.email);
    assert_eq!(server.state.db.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_denied_consent_flashes_notice_without_creating_user() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;

    let session = server.begin_login("/grades").await;
    let response = server
        .get(
            &format!("/oauth-authorized?oauth_token={REQUEST_TOKEN}&next=%2Fgrades"),
            Some(&session),
        )
        .await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/grades");
    assert_eq!(server.state.db.count_users().await.unwrap(), 0);

    let page = server.get("/", Some(&session)).await.text().await.unwrap();
    assert!(page.contains("You denied the request to sign in."));
    assert!(page.contains("Sign in with USOS"));
}

#[tokio::test]
async fn test_access_token_without_token_is_denied() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;
    Mock::given(method("POST"))
        .and(path("/services/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server.usos)
        .await;

    let session = server.begin_login("/").await;
    let response = server
        .get(
            &format!("/oauth-authorized?oauth_token={REQUEST_TOKEN}&oauth_verifier={VERIFIER}"),
            Some(&session),
        )
        .await;

    assert!(response.status().is_redirection());
    assert_eq!(server.state.db.count_users().await.unwrap(), 0);
    let page = server.get("/", Some(&session)).await.text().await.unwrap();
    assert!(page.contains("You denied the request to sign in."));
}

#[tokio::test]
async fn test_profile_error_aborts_login() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;
    server.mock_access_token().await;
    Mock::given(method("GET"))
        .and(path("/services/users/user"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server.usos)
        .await;

    let session = server.begin_login("/grades").await;
    let response = server
        .get(
            &format!(
                "/oauth-authorized?oauth_token={REQUEST_TOKEN}&oauth_verifier={VERIFIER}&next=%2Fgrades"
            ),
            Some(&session),
        )
        .await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/grades");
    assert_eq!(server.state.db.count_users().await.unwrap(), 0);

    let page = server.get("/", Some(&session)).await.text().await.unwrap();
    assert!(page.contains("Could not get user data!"));
    assert!(page.contains("Sign in with USOS"));
}

#[tokio::test]
async fn test_request_token_failure_redirects_back() {
    let server = TestServer::new().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth/request_token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("oauth_problem=consumer_key_unknown"))
        .mount(&server.usos)
        .await;

    let response = server.get("/authorize?next=%2Fgrades", None).await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/grades");
}

#[tokio::test]
async fn test_authenticated_user_is_not_sent_to_usos_again() {
    let server = TestServer::new().await;
    // log_in expects a single request-token call
    let session = server.log_in(profile("42", "Ana", "Kowalska")).await;

    let response = server.get("/authorize?next=%2Fgrades", Some(&session)).await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_foreign_next_is_not_followed() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;

    let session = server.begin_login("https://evil.example/").await;
    let response = server
        .get(
            &format!("/oauth-authorized?oauth_token={REQUEST_TOKEN}&next=https%3A%2F%2Fevil.example%2F"),
            Some(&session),
        )
        .await;

    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_logout_requires_login() {
    let server = TestServer::new().await;

    let response = server.get("/logout", None).await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/");
    let session = common::session_cookie(&response).expect("session cookie");
    let page = server.get("/", Some(&session)).await.text().await.unwrap();
    assert!(page.contains("Please log in to access this page."));
}

#[tokio::test]
async fn test_logout_ends_session() {
    let server = TestServer::new().await;
    let session = server.log_in(profile("42", "Ana", "Kowalska")).await;

    let response = server.get("/logout", Some(&session)).await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/");

    let page = server.get("/", Some(&session)).await.text().await.unwrap();
    assert!(page.contains("You have been logged out."));
    assert!(page.contains("Sign in with USOS"));

    // The user row stays
    assert_eq!(server.state.db.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_forged_session_cookie_is_ignored() {
    let server = TestServer::new().await;
    let session = server.log_in(profile("42", "Ana", "Kowalska")).await;
    let forged = format!("{}x", session);

    let page = server.get("/", Some(&forged)).await.text().await.unwrap();
    assert!(page.contains("Sign in with USOS"));
}

#[tokio::test]
async fn test_session_id_changes_on_sign_in() {
    let server = TestServer::new().await;
    server.mock_request_token(1).await;
    server.mock_access_token().await;
    server.mock_profile(profile("42", "Ana", "Kowalska")).await;

    let before = server.begin_login("/").await;
    let response = server
        .get(
            &format!("/oauth-authorized?oauth_token={REQUEST_TOKEN}&oauth_verifier={VERIFIER}"),
            Some(&before),
        )
        .await;
    let after = common::session_cookie(&response).expect("session cookie");

    assert_ne!(after, before);
    let page = server.get("/", Some(&before)).await.text().await.unwrap();
    assert!(page.contains("Sign in with USOS"));
    assert!(!page.contains("Ana Kowalska"));
    assert_eq!(server.state.sessions.len().await, 1);
}

#[tokio::test]
async fn test_control_characters_in_next_redirect_home() {
    let server = TestServer::new().await;

    for next in ["%2Fa%0Ab", "%2Fa%7Fb", "%2Fa%0D%0ASet-Cookie%3A%20x%3D1"] {
        let response = server
            .get(&format!("/oauth-authorized?next={next}"), None)
            .await;

        assert!(response.status().is_redirection(), "next={next}");
        assert_eq!(location(&response), "/", "next={next}");
    }
}

#[tokio::test]
async fn test_control_characters_in_next_on_failed_authorize() {
    let server = TestServer::new().await;
    Mock::given(method("POST"))
        .and(path("/services/oauth/request_token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server.usos)
        .await;

    for next in ["%2Fa%0Ab", "%2Fa%7Fb"] {
        let response = server.get(&format!("/authorize?next={next}"), None).await;

        assert!(response.status().is_redirection(), "next={next}");
        assert_eq!(location(&response), "/", "next={next}");
    }
}

#[tokio::test]
async fn test_tab_in_next_does_not_leave_the_site() {
    let server = TestServer::new().await;

    let response = server
        .get("/oauth-authorized?next=%2F%09%2Fevil.example%2F", None)
        .await;

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_anonymous_visits_do_not_create_sessions() {
    let server = TestServer::new().await;

    for _ in 0..20 {
        let response = server.get("/", None).await;
        assert_eq!(response.status(), 200);
        assert!(common::session_cookie(&response).is_none());
    }

    assert_eq!(server.state.sessions.len().await, 0);
}

#[tokio::test]
async fn test_consumed_flash_session_is_dropped() {
    let server = TestServer::new().await;
    let response = server.get("/logout", None).await;
    let session = common::session_cookie(&response).expect("session cookie");
    assert_eq!(server.state.sessions.len().await, 1);

    let page = server.get("/", Some(&session)).await.text().await.unwrap();

    assert!(page.contains("Please log in to access this page."));
    assert_eq!(server.state.sessions.len().await, 0);
}
