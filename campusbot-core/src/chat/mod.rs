//! Chat message handling
//!
//! [`ChatService::handle`] takes one user message through the whole
//! pipeline:
//!
//! 1. Resolve the chat session, titling it if this is its first message
//! 2. Store the user message (login passwords masked)
//! 3. Try the handlers suggested by [`crate::intent::candidates`] in order
//!    until one replies
//! 4. Store the reply
//!
//! Text sent to a completion backend is redacted first.

mod redact;
mod title;

pub use redact::Redactor;
pub use title::{clean_model_title, generate_title, local_title, UNTITLED};

use serde::Serialize;

use crate::config::ChatConfig;
use crate::error::{Error, PortalError, Result};
use crate::extract::ParamExtractor;
use crate::format;
use crate::intent::{self, Intent};
use crate::llm::{CompletionBackend, CompletionRequest};
use crate::portal::{Access, GradeExtractor, GradeFlow, PortalApi};
use crate::store::{CredentialStore, KnowledgeBase, SessionStore};
use crate::types::{ChatMessage, ExtractionParams, PortalCredentials, Sender};
use crate::vault::CredentialVault;

const ASSISTANT_SYSTEM_PROMPT: &str = "You are CampusBot, a helpful university assistant. Use the facts in the FAQ snippets when relevant. Be concise. Do not invent personal data.";

const FAQ_CONTEXT_SIZE: usize = 3;

/// Which handler produced a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Login,
    Events,
    Portal,
    Faq,
    Assistant,
    Fallback,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplySource::Login => "login",
            ReplySource::Events => "events",
            ReplySource::Portal => "portal",
            ReplySource::Faq => "faq",
            ReplySource::Assistant => "assistant",
            ReplySource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub source: ReplySource,
    pub session_id: i64,
    pub session_title: Option<String>,
}

/// Everything a message handler may need that is not in the store.
pub struct ChatDeps<'a> {
    pub vault: &'a dyn CredentialVault,
    pub portal: &'a dyn PortalApi,
    pub extractor: &'a GradeExtractor,
    /// `None` disables the model-backed features
    pub completion: Option<&'a CompletionBackend>,
}

pub struct ChatService<'a, S> {
    store: &'a S,
    deps: ChatDeps<'a>,
    config: ChatConfig,
    redactor: Redactor,
}

/// Per-message values shared by the handlers.
struct Turn<'m> {
    user_id: i64,
    /// Redacted message text
    safe_text: &'m str,
    history: &'m [ChatMessage],
}

impl<'a, S> ChatService<'a, S>
where
    S: SessionStore + CredentialStore + KnowledgeBase,
{
    pub fn new(store: &'a S, deps: ChatDeps<'a>, config: ChatConfig) -> Result<Self> {
        Ok(Self {
            store,
            deps,
            config,
            redactor: Redactor::new()?,
        })
    }

    /// Handle one message from `user_id`. `session_id` continues a session
    /// the user owns; anything else starts a new one.
    pub async fn handle(&self, user_id: i64, session_id: Option<i64>, message: &str) -> Result<ChatReply> {
        if message.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        let masked = intent::mask_login(message);
        let safe_text = self.redactor.redact(&masked);

        let session_id = self.store.get_or_create_session(user_id, session_id)?;
        let session_title = self.ensure_title(session_id, &safe_text).await?;
        let mut history = self.store.recent_messages(session_id, self.config.history_turns)?;
        for earlier in &mut history {
            earlier.text = self.redactor.redact(&earlier.text);
        }

        self.store.append_message(session_id, Sender::User, &masked)?;
        self.store.touch_session(session_id)?;

        let turn = Turn {
            user_id,
            safe_text: &safe_text,
            history: &history,
        };

        let mut answer = None;
        for candidate in intent::candidates(message) {
            tracing::debug!(user_id, session_id, intent = candidate.as_str(), "Trying handler");
            answer = self.dispatch(candidate, &turn).await?;
            if answer.is_some() {
                break;
            }
        }
        let (reply, source) = match answer {
            Some(answer) => answer,
            None => self.answer_general(&turn).await?,
        };

        self.store.append_message(session_id, Sender::Bot, &reply)?;
        self.store.touch_session(session_id)?;

        tracing::info!(user_id, session_id, source = source.as_str(), "Replied");
        Ok(ChatReply {
            reply,
            source,
            session_id,
            session_title,
        })
    }

    /// Current title, generating one if the session is still empty.
    async fn ensure_title(&self, session_id: i64, safe_text: &str) -> Result<Option<String>> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or(Error::SessionNotFound(session_id))?;
        if session.title.is_some() {
            return Ok(session.title);
        }
        if self.store.count_messages(session_id)? > 0 {
            return Ok(None);
        }

        let backend = if self.config.llm_titles {
            self.deps.completion
        } else {
            None
        };
        let title = generate_title(backend, safe_text, self.config.max_title_chars).await;
        if self.store.set_title_if_unset(session_id, &title)? {
            tracing::debug!(session_id, title = %title, "Titled session");
            return Ok(Some(title));
        }
        // lost a race with another writer
        Ok(self.store.get_session(session_id)?.and_then(|s| s.title))
    }

    async fn dispatch(&self, intent: Intent, turn: &Turn<'_>) -> Result<Option<(String, ReplySource)>> {
        match intent {
            Intent::Login { username, password } => {
                let reply = match self
                    .connect_portal(turn.user_id, &PortalCredentials::new(username, password))
                    .await?
                {
                    Ok(()) => format::LOGIN_SUCCEEDED.to_string(),
                    Err(e) => format::login_failed(&e),
                };
                Ok(Some((reply, ReplySource::Login)))
            }
            Intent::RegistrationQuery => Ok(self
                .store
                .find_registration_event(turn.safe_text)?
                .map(|event| (format::format_registration_event(&event), ReplySource::Events))),
            Intent::GradesQuery => self
                .answer_grades(turn)
                .await
                .map(|reply| Some((reply, ReplySource::Portal))),
            Intent::Unclassified => self.answer_general(turn).await.map(Some),
        }
    }

    /// Log in to the portal and save the account. The outer `Result` is
    /// storage, the inner one the portal.
    pub async fn connect_portal(
        &self,
        user_id: i64,
        credentials: &PortalCredentials,
    ) -> Result<std::result::Result<(), PortalError>> {
        match self.deps.portal.login(credentials).await {
            Ok(session) => {
                let sealed = self.deps.vault.encrypt(&credentials.password)?;
                self.store
                    .persist_credentials(user_id, &credentials.username, &sealed, &session)?;
                tracing::info!(user_id, username = %credentials.username, "Portal account connected");
                Ok(Ok(()))
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, kind = ?e.kind(), "Portal connect failed");
                Ok(Err(e))
            }
        }
    }

    /// Run a grade request with explicit filters, bypassing extraction.
    pub async fn grades(&self, user_id: i64, params: &ExtractionParams) -> Result<String> {
        let params = params.clone().normalized();
        let flow = GradeFlow::new(self.deps.portal, self.deps.extractor, self.store, self.deps.vault);
        let outcome = flow.run(user_id, &params).await?;
        Ok(format::format_grade_outcome(&outcome, &params))
    }

    async fn answer_grades(&self, turn: &Turn<'_>) -> Result<String> {
        let flow = GradeFlow::new(self.deps.portal, self.deps.extractor, self.store, self.deps.vault);

        let (outcome, params) = match flow.open(turn.user_id).await? {
            Access::Unavailable(outcome) => (outcome, Default::default()),
            Access::Ready(access) => {
                let params = ParamExtractor::new(self.deps.completion)
                    .extract(turn.safe_text, turn.history)
                    .await
                    .normalized();
                (flow.fetch(access, &params).await?, params)
            }
        };

        Ok(format::format_grade_outcome(&outcome, &params))
    }

    /// FAQ lookup, then the completion backend, then a fixed apology.
    async fn answer_general(&self, turn: &Turn<'_>) -> Result<(String, ReplySource)> {
        if let Some(faq) = self.store.find_faq(turn.safe_text)? {
            return Ok((faq.answer, ReplySource::Faq));
        }

        let Some(backend) = self.deps.completion else {
            return Ok((format::ASSISTANT_UNAVAILABLE.to_string(), ReplySource::Fallback));
        };

        let faqs = self.store.recent_faqs(FAQ_CONTEXT_SIZE)?;
        let mut prompt = String::new();
        if !faqs.is_empty() {
            let snippets: Vec<String> = faqs
                .iter()
                .enumerate()
                .map(|(i, faq)| format!("FAQ {} Q: {}\nA: {}", i + 1, faq.question, faq.answer))
                .collect();
            prompt.push_str(&format!("Relevant FAQs:\n{}\n", snippets.join("\n\n")));
        }
        prompt.push_str(&format!("Student asked: {}", turn.safe_text));

        let request = CompletionRequest::new(ASSISTANT_SYSTEM_PROMPT, prompt).max_tokens(2000);
        match backend.complete(&request).await {
            Ok(text) => Ok((text, ReplySource::Assistant)),
            Err(e) => {
                tracing::warn!(user_id = turn.user_id, error = %e, "General answer unavailable");
                Ok((format::ASSISTANT_UNAVAILABLE.to_string(), ReplySource::Fallback))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalConfig;
    use crate::db::Database;
    use crate::error::{CompletionError, PortalError};
    use crate::llm::TextCompletion;
    use crate::portal::PortalPayload;
    use crate::store::NewRegistrationEvent;
    use crate::types::PortalSession;
    use crate::vault::AesVault;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakePortal;

    #[async_trait]
    impl PortalApi for FakePortal {
        async fn login(
            &self,
            credentials: &PortalCredentials,
        ) -> std::result::Result<PortalSession, PortalError> {
            if credentials.password == "Right-Pass" {
                Ok(PortalSession::new(vec!["auth=ok".to_string()]))
            } else {
                Err(PortalError::InvalidCredentials)
            }
        }

        async fn fetch(
            &self,
            _session: &PortalSession,
            endpoint: &str,
        ) -> std::result::Result<PortalPayload, PortalError> {
            let body = if endpoint.contains("GetCurriculumInfo") {
                json!({"data": [{"CurriculumTblCode": "C1"}]})
            } else if endpoint.contains("GetStudentBasicInfo") {
                json!({"data": [{"StudentCurriculumTblCode": "S1"}]})
            } else if endpoint.contains("GetStudentRegistration") {
                json!({"data": [{"Batch": 1, "Semester": "II", "CGPA": "3.10", "SGPA": "3.20", "FinalStatus": "Promoted"}]})
            } else {
                json!({"data": []})
            };
            Ok(PortalPayload::Json(body))
        }
    }

    /// Records prompts, answers with a fixed string.
    struct Recorder {
        prompts: Arc<Mutex<Vec<String>>>,
        reply: std::result::Result<String, CompletionError>,
    }

    #[async_trait]
    impl TextCompletion for Recorder {
        async fn complete(
            &self,
            _model: &str,
            request: &CompletionRequest,
        ) -> std::result::Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(request.user.clone());
            self.reply.clone()
        }
    }

    struct Fixture {
        db: Database,
        vault: AesVault,
        extractor: GradeExtractor,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Fixture {
            db,
            vault: AesVault::new("chat-test").unwrap(),
            extractor: GradeExtractor::new(&PortalConfig::default()).unwrap(),
        }
    }

    fn service<'a>(
        f: &'a Fixture,
        portal: &'a FakePortal,
        completion: Option<&'a CompletionBackend>,
        config: ChatConfig,
    ) -> ChatService<'a, Database> {
        let deps = ChatDeps {
            vault: &f.vault,
            portal,
            extractor: &f.extractor,
            completion,
        };
        ChatService::new(&f.db, deps, config).unwrap()
    }

    #[tokio::test]
    async fn test_login_then_grades() {
        let f = fixture();
        let chat = service(&f, &FakePortal, None, ChatConfig::default());

        let reply = chat.handle(1, None, "login ugr/1/14 Right-Pass").await.unwrap();
        assert_eq!(reply.source, ReplySource::Login);
        assert_eq!(reply.reply, format::LOGIN_SUCCEEDED);

        let stored = f.db.session_messages(reply.session_id).unwrap();
        assert_eq!(stored[0].text, "login ugr/1/14 ********");
        assert_eq!(reply.session_title.as_deref(), Some("Login ugr/1/14 ********"));
        let account = f.db.load_credentials(1).unwrap().unwrap();
        assert_ne!(account.password_encrypted.as_deref(), Some("Right-Pass"));

        let reply = chat
            .handle(1, Some(reply.session_id), "what is my cgpa")
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Portal);
        assert!(reply.reply.starts_with("Here are your results:\n\nYear 1, Semester II"));
        assert!(reply.reply.contains("• CGPA: 3.10"));
    }

    #[tokio::test]
    async fn test_login_failure_reply() {
        let f = fixture();
        let chat = service(&f, &FakePortal, None, ChatConfig::default());
        let reply = chat.handle(1, None, "login ugr/1/14 wrong").await.unwrap();
        assert_eq!(reply.source, ReplySource::Login);
        assert!(reply.reply.starts_with("Login failed:"));
        assert!(f.db.load_credentials(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grades_without_account() {
        let f = fixture();
        let chat = service(&f, &FakePortal, None, ChatConfig::default());
        let reply = chat.handle(1, None, "show my grades").await.unwrap();
        assert_eq!(reply.reply, format::CONNECT_INSTRUCTIONS);
        assert_eq!(reply.source, ReplySource::Portal);
    }

    #[tokio::test]
    async fn test_registration_event_and_fallthrough() {
        let f = fixture();
        f.db.insert_registration_event(&NewRegistrationEvent {
            title: "Registration".to_string(),
            description: Some("Bring your ID card".to_string()),
            start_at: Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2025, 9, 5, 17, 0, 0).unwrap(),
            location: None,
        })
        .unwrap();
        f.db.insert_faq("How do I enroll in a course?", "Use the add/drop form.").unwrap();
        let chat = service(&f, &FakePortal, None, ChatConfig::default());

        let reply = chat.handle(1, None, "registration").await.unwrap();
        assert_eq!(reply.source, ReplySource::Events);
        assert!(reply.reply.ends_with("Location: not specified. Bring your ID card"));

        // no event matches, falls through to the FAQ
        let reply = chat.handle(1, None, "enroll in a course").await.unwrap();
        assert_eq!(reply.source, ReplySource::Faq);
        assert_eq!(reply.reply, "Use the add/drop form.");
    }

    #[tokio::test]
    async fn test_general_answer_is_redacted_and_falls_back() {
        let f = fixture();
        f.db.insert_faq("Library hours", "8am to 10pm").unwrap();
        let recorder = Recorder {
            prompts: Arc::default(),
            reply: Ok("The cafeteria is near block 12.".to_string()),
        };
        let backend = CompletionBackend::new(Box::new(recorder), vec!["m".to_string()], Duration::ZERO);
        let chat = service(&f, &FakePortal, Some(&backend), ChatConfig::default());

        let reply = chat
            .handle(1, None, "where is the cafeteria? mail me at a.b@bdu.edu.et")
            .await
            .unwrap();
        assert_eq!(reply.source, ReplySource::Assistant);

        let chat = service(&f, &FakePortal, None, ChatConfig::default());
        let reply = chat.handle(1, None, "where is the cafeteria?").await.unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);
        assert_eq!(reply.reply, format::ASSISTANT_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_prompt_redaction() {
        let f = fixture();
        let prompts: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorder = Recorder {
            prompts: Arc::clone(&prompts),
            reply: Err(CompletionError::Overloaded { model: "m".to_string() }),
        };
        let backend = CompletionBackend::new(Box::new(recorder), vec!["m".to_string()], Duration::ZERO);
        let config = ChatConfig {
            llm_titles: true,
            ..ChatConfig::default()
        };
        let chat = service(&f, &FakePortal, Some(&backend), config);

        let reply = chat.handle(1, None, "my id is 1234567, who is my advisor").await.unwrap();
        assert_eq!(reply.source, ReplySource::Fallback);

        let prompts = prompts.lock().unwrap();
        // title request, then the general answer
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| !p.contains("1234567")));
        assert!(prompts[1].ends_with("Student asked: my id is [REDACTED_ID], who is my advisor"));
        // the local title is built from redacted text too
        assert_eq!(reply.session_title.as_deref(), Some("My id is [REDACTED_ID], who is"));
    }

    #[tokio::test]
    async fn test_title_set_once() {
        let f = fixture();
        let chat = service(&f, &FakePortal, None, ChatConfig::default());

        let first = chat.handle(1, None, "where is the library").await.unwrap();
        assert_eq!(first.session_title.as_deref(), Some("Where is the library"));

        let second = chat
            .handle(1, Some(first.session_id), "and the cafeteria")
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.session_title.as_deref(), Some("Where is the library"));

        // someone else's session id starts a fresh one
        let other = chat.handle(2, Some(first.session_id), "hello there").await.unwrap();
        assert_ne!(other.session_id, first.session_id);
        assert_eq!(other.session_title.as_deref(), Some("Hello there"));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let f = fixture();
        let chat = service(&f, &FakePortal, None, ChatConfig::default());
        assert!(matches!(chat.handle(1, None, "   ").await, Err(Error::EmptyMessage)));
    }
}
