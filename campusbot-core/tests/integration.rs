//! Integration tests against a mock student portal and completion backend
//!
//! Portal responses come from `tests/fixtures/portal/`.

use campusbot_core::chat::{ChatDeps, ChatService, ReplySource};
use campusbot_core::config::{ChatConfig, LlmConfig, LlmProvider, PortalConfig};
use campusbot_core::llm::{CompletionBackend, CompletionRequest};
use campusbot_core::portal::{GradeExtractor, GradeFlow, GradeFlowOutcome, PortalApi, PortalClient};
use campusbot_core::store::CredentialStore;
use campusbot_core::types::{DetailLevel, ExtractionParams, PortalCredentials, PortalSession};
use campusbot_core::vault::{AesVault, CredentialVault};
use campusbot_core::{Database, PortalError};
use std::path::PathBuf;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/portal")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("missing fixture {path:?}: {e}"))
}

fn json_response(name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(fixture(name), "application/json")
}

fn html_response(name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(fixture(name), "text/html; charset=utf-8")
}

fn portal_config(server: &MockServer) -> PortalConfig {
    campusbot_core::logging::init_test();
    PortalConfig {
        base_url: server.uri(),
        timeout_secs: 5,
        ..Default::default()
    }
}

/// Login page plus a POST that accepts `good-pass` and sets `auth=fresh`.
async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/Account/Login"))
        .respond_with(
            html_response("login.html").append_header("set-cookie", "antiforgery=af1; path=/; httponly"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/Account/Login"))
        .and(header("cookie", "antiforgery=af1"))
        .and(body_string_contains("__RequestVerificationToken=CfDJ8Nq-token-value"))
        .and(body_string_contains("Password=good-pass"))
        .respond_with(
            ResponseTemplate::new(302)
                .append_header("location", "/")
                .append_header("set-cookie", "auth=fresh; path=/; httponly"),
        )
        .with_priority(1)
        .mount(server)
        .await;

    // Wrong password: the form is shown again, with no new cookies
    Mock::given(method("POST"))
        .and(path("/Account/Login"))
        .respond_with(html_response("login.html"))
        .mount(server)
        .await;
}

/// Discovery endpoints, answered only for the `auth=fresh` session.
async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/RegistrationSummary/GetCurriculumInfo"))
        .and(header("cookie", "auth=fresh"))
        .respond_with(json_response("curriculum.json"))
        .with_priority(1)
        .mount(server)
        .await;

    // Anything else is treated as an expired session
    Mock::given(method("GET"))
        .and(path("/RegistrationSummary/GetCurriculumInfo"))
        .respond_with(ResponseTemplate::new(302).append_header("location", "/Account/Login"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/RegistrationSummary/GetStudentBasicInfo"))
        .and(query_param("curriculumCode", "CUR-77"))
        .respond_with(json_response("student_info.json"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/RegistrationSummary/GetStudentRegistration"))
        .and(query_param("studentCurriculumCode", "306932"))
        .respond_with(json_response("registrations.json"))
        .mount(server)
        .await;
}

fn fresh_session() -> PortalSession {
    PortalSession::new(vec!["auth=fresh; path=/; httponly".to_string()])
}

// ============================================
// Login
// ============================================

#[tokio::test]
async fn test_login_form_flow() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    let client = PortalClient::new(&portal_config(&server)).unwrap();

    let session = client
        .login(&PortalCredentials::new("ugr/1234/14", "good-pass"))
        .await
        .expect("login should succeed");
    assert_eq!(session.len(), 1);

    let rejected = client
        .login(&PortalCredentials::new("ugr/1234/14", "bad-pass"))
        .await;
    assert_eq!(rejected, Err(PortalError::InvalidCredentials));
}

#[tokio::test]
async fn test_login_page_without_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Account/Login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><form></form></html>"))
        .mount(&server)
        .await;
    let client = PortalClient::new(&portal_config(&server)).unwrap();

    let result = client.login(&PortalCredentials::new("u", "p")).await;
    assert_eq!(result, Err(PortalError::TokenNotFound));
}

// ============================================
// Grade extraction
// ============================================

#[tokio::test]
async fn test_summary_reports_latest_graded_term() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();

    let grades = extractor
        .fetch_grades(&client, &fresh_session(), &ExtractionParams::default())
        .await
        .unwrap();

    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0].batch_year, Some(3));
    assert_eq!(grades[0].semester.as_deref(), Some("I"));
    assert_eq!(grades[0].cgpa, "3.41");
    assert_eq!(grades[0].semester_gpa, "3.62");
    assert!(grades[0].courses.is_empty());
}

#[tokio::test]
async fn test_detail_falls_back_to_scraped_summary_page_once() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    // Every JSON detail endpoint is unmatched and answers 404
    Mock::given(method("GET"))
        .and(path("/Report/StudentLevel/AcademicSumamry"))
        .respond_with(html_response("academic_summary.html"))
        .expect(1)
        .mount(&server)
        .await;

    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();

    // A course filter selects every term; the page is still fetched once
    let params = ExtractionParams {
        course_filter: Some("networks".to_string()),
        ..Default::default()
    };
    let grades = extractor
        .fetch_grades(&client, &fresh_session(), &params)
        .await
        .unwrap();

    // newest first
    let years: Vec<_> = grades.iter().map(|g| g.batch_year).collect();
    assert_eq!(years, vec![Some(4), Some(3), Some(2), Some(1)]);

    // The page names no terms, so its rows go to the newest graded term only
    let with_courses: Vec<_> = grades.iter().filter(|g| !g.courses.is_empty()).collect();
    assert_eq!(with_courses.len(), 1);
    assert_eq!(with_courses[0].batch_year, Some(3));
    assert_eq!(with_courses[0].courses.len(), 2);
    assert_eq!(with_courses[0].courses[1].title, "Computer Networks");
    assert_eq!(with_courses[0].courses[1].letter_grade, "B+");
}

#[tokio::test]
async fn test_scraped_rows_with_terms_stay_in_their_term() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let page = r##"<html><body><script>
        $("#grid").kendoGrid({ dataSource: [
            {"Batch": 1, "Semester": "II", "CourseCode": "Math1041", "CourseTitle": "Applied Mathematics I", "LetterGrade": "B"},
            {"Batch": 2, "Semester": "I", "CourseCode": "CoSc2051", "CourseTitle": "Object Oriented Programming", "LetterGrade": "A"}
        ] });
    </script></body></html>"##;
    Mock::given(method("GET"))
        .and(path("/Report/StudentLevel/AcademicSumamry"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page, "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();

    let params = ExtractionParams {
        course_filter: Some("programming".to_string()),
        ..Default::default()
    };
    let grades = extractor
        .fetch_grades(&client, &fresh_session(), &params)
        .await
        .unwrap();

    assert_eq!(grades.len(), 4);
    let by_year = |year: i64| {
        grades
            .iter()
            .find(|g| g.batch_year == Some(year))
            .map(|g| g.courses.iter().map(|c| c.code.as_str()).collect::<Vec<_>>())
            .unwrap()
    };
    assert!(by_year(4).is_empty());
    assert!(by_year(3).is_empty());
    assert_eq!(by_year(2), ["CoSc2051"]);
    assert_eq!(by_year(1), ["Math1041"]);

    let reply = campusbot_core::format::format_grades(&grades, &params);
    assert_eq!(reply, "Year 2, Semester I\nObject Oriented Programming (CoSc2051): A");
}

#[tokio::test]
async fn test_detail_prefers_json_endpoint() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/RegistrationSummary/GetStudentGradeBySemester"))
        .and(query_param("academicYear", "3"))
        .and(query_param("semester", "I"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"CourseCode": "CoSc3025", "CourseTitle": "Operating Systems", "Grade": "A-"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Report/StudentLevel/AcademicSumamry"))
        .respond_with(html_response("academic_summary.html"))
        .expect(0)
        .mount(&server)
        .await;

    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();

    let params = ExtractionParams {
        year: Some(3),
        semester: Some(1),
        detail_level: DetailLevel::Detailed,
        course_filter: None,
    };
    let grades = extractor
        .fetch_grades(&client, &fresh_session(), &params)
        .await
        .unwrap();

    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0].courses.len(), 1);
    assert_eq!(grades[0].courses[0].letter_grade, "A-");
}

#[tokio::test]
async fn test_no_matching_term() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();

    let params = ExtractionParams {
        year: Some(5),
        ..Default::default()
    };
    let result = extractor.fetch_grades(&client, &fresh_session(), &params).await;
    assert_eq!(
        result,
        Err(PortalError::NoMatchingTerm {
            year: Some(5),
            semester: None
        })
    );
}

// ============================================
// Session expiry
// ============================================

fn database() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    db
}

#[tokio::test]
async fn test_expired_cookies_are_refreshed_once() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_discovery(&server).await;
    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();
    let vault = AesVault::new("integration").unwrap();
    let db = database();

    let stale = PortalSession::new(vec!["auth=stale".to_string()]);
    let sealed = vault.encrypt("good-pass").unwrap();
    db.persist_credentials(7, "ugr/1234/14", &sealed, &stale).unwrap();

    let flow = GradeFlow::new(&client, &extractor, &db, &vault);
    let outcome = flow.run(7, &ExtractionParams::default()).await.unwrap();

    match outcome {
        GradeFlowOutcome::Grades {
            grades,
            session_refreshed,
        } => {
            assert!(session_refreshed);
            assert_eq!(grades[0].cgpa, "3.41");
        }
        other => panic!("expected grades, got {other:?}"),
    }

    // The new cookies were saved
    let stored = db.load_credentials(7).unwrap().unwrap();
    assert_eq!(stored.session, Some(PortalSession::new(vec!["auth=fresh; path=/; httponly".to_string()])));
}

#[tokio::test]
async fn test_changed_password_requires_reconnect() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_discovery(&server).await;
    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();
    let vault = AesVault::new("integration").unwrap();
    let db = database();

    let stale = PortalSession::new(vec!["auth=stale".to_string()]);
    let sealed = vault.encrypt("old-pass").unwrap();
    db.persist_credentials(7, "ugr/1234/14", &sealed, &stale).unwrap();

    let flow = GradeFlow::new(&client, &extractor, &db, &vault);
    let outcome = flow.run(7, &ExtractionParams::default()).await.unwrap();
    assert_eq!(
        outcome,
        GradeFlowOutcome::ReconnectRequired {
            error: Some(PortalError::InvalidCredentials)
        }
    );
}

// ============================================
// Completion backend
// ============================================

fn ollama_config(server: &MockServer, models: &[&str]) -> LlmConfig {
    LlmConfig {
        provider: LlmProvider::Ollama,
        model: models[0].to_string(),
        fallback_models: models[1..].iter().map(|m| m.to_string()).collect(),
        endpoint: Some(server.uri()),
        api_key: None,
        timeout_secs: 5,
        retry_delay_ms: 0,
    }
}

#[tokio::test]
async fn test_completion_falls_back_to_next_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"model": "missing-model"})))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"model": "small-model", "format": "json"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "{\"year\": 2, \"semester\": null, \"detail_level\": \"summary\", \"course_filter\": null}"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = CompletionBackend::from_config(&ollama_config(&server, &["missing-model", "small-model"])).unwrap();
    let request = CompletionRequest::new("system", "year 2 results").json();
    let text = backend.complete(&request).await.unwrap();
    assert!(text.contains("\"year\": 2"));
}

// ============================================
// End to end
// ============================================

#[tokio::test]
async fn test_chat_login_then_course_grade() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/Report/StudentLevel/AcademicSumamry"))
        .respond_with(html_response("academic_summary.html"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "{\"year\": null, \"semester\": null, \"detail_level\": \"summary\", \"course_filter\": \"Operating Systems\"}"
        })))
        .mount(&server)
        .await;

    let config = portal_config(&server);
    let client = PortalClient::new(&config).unwrap();
    let extractor = GradeExtractor::new(&config).unwrap();
    let backend = CompletionBackend::from_config(&ollama_config(&server, &["small-model"])).unwrap();
    let vault = AesVault::new("integration").unwrap();
    let db = database();

    let deps = ChatDeps {
        vault: &vault,
        portal: &client,
        extractor: &extractor,
        completion: Some(&backend),
    };
    let chat = ChatService::new(&db, deps, ChatConfig::default()).unwrap();

    let login = chat.handle(3, None, "login ugr/1234/14 good-pass").await.unwrap();
    assert_eq!(login.source, ReplySource::Login);

    let reply = chat
        .handle(3, Some(login.session_id), "what grade did I get in operating systems")
        .await
        .unwrap();
    assert_eq!(reply.source, ReplySource::Portal);
    assert_eq!(reply.reply, "Year 3, Semester I\nOperating Systems (CoSc3025): A");
    assert_eq!(reply.reply.matches("Operating Systems (CoSc3025)").count(), 1);
}
