//! Session-expiry recovery for grade requests
//!
//! Stored cookies go stale without notice, and the portal does not say so
//! clearly: an expired session shows up as a redirect, an error status, or
//! the login page served where JSON was expected. A grade request therefore
//! runs as a small state machine:
//!
//! ```text
//! HaveCookies ──fetch ok──────────────▶ Done(Grades)
//!     │ fetch failed, budget left
//!     ▼
//! Reauthenticating ──login ok──▶ HaveCookies (budget spent)
//!     │ login failed
//!     ▼
//! Done(ReconnectRequired)
//! ```
//!
//! Each request gets one re-authentication. Logging in because no cookies
//! were stored spends it too, so the portal never sees more than one login
//! per request.

use crate::error::{PortalError, Result};
use crate::store::CredentialStore;
use crate::types::{ExtractionParams, NormalizedGrade, PortalCredentials, PortalSession};
use crate::vault::CredentialVault;

use super::grades::GradeExtractor;
use super::PortalApi;

/// How a grade request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeFlowOutcome {
    Grades {
        grades: Vec<NormalizedGrade>,
        /// True when a login happened during this request
        session_refreshed: bool,
    },
    /// No cookies and no usable stored credentials
    NotConnected,
    /// Login or the retried fetch failed. `None` when the stored password
    /// could not be decrypted.
    ReconnectRequired { error: Option<PortalError> },
    /// The session worked but no registration matched the filters
    NoMatchingTerm {
        year: Option<i64>,
        semester: Option<u8>,
    },
}

/// A usable portal session for one user, plus what is left of the
/// re-authentication budget.
#[derive(Debug)]
pub struct PortalAccess {
    user_id: i64,
    session: PortalSession,
    credentials: Option<PortalCredentials>,
    reauth_available: bool,
    refreshed: bool,
}

impl PortalAccess {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn session_refreshed(&self) -> bool {
        self.refreshed
    }
}

/// Result of [`GradeFlow::open`].
#[derive(Debug)]
pub enum Access {
    Ready(PortalAccess),
    Unavailable(GradeFlowOutcome),
}

enum FlowState {
    HaveCookies(PortalSession),
    Reauthenticating(PortalError),
    Done(GradeFlowOutcome),
}

/// Runs grade requests with at most one re-login each.
pub struct GradeFlow<'a> {
    api: &'a dyn PortalApi,
    extractor: &'a GradeExtractor,
    credentials: &'a dyn CredentialStore,
    vault: &'a dyn CredentialVault,
}

impl<'a> GradeFlow<'a> {
    pub fn new(
        api: &'a dyn PortalApi,
        extractor: &'a GradeExtractor,
        credentials: &'a dyn CredentialStore,
        vault: &'a dyn CredentialVault,
    ) -> Self {
        Self {
            api,
            extractor,
            credentials,
            vault,
        }
    }

    /// Open and fetch in one step.
    pub async fn run(&self, user_id: i64, params: &ExtractionParams) -> Result<GradeFlowOutcome> {
        match self.open(user_id).await? {
            Access::Ready(access) => self.fetch(access, params).await,
            Access::Unavailable(outcome) => Ok(outcome),
        }
    }

    /// Load the user's portal account and make sure there is a session to
    /// try. Logs in from stored credentials when no cookies are saved.
    ///
    /// Split from [`GradeFlow::fetch`] so callers can skip parameter
    /// extraction for users who are not connected.
    pub async fn open(&self, user_id: i64) -> Result<Access> {
        let Some(stored) = self.credentials.load_credentials(user_id)? else {
            return Ok(Access::Unavailable(GradeFlowOutcome::NotConnected));
        };

        let credentials = match (&stored.username, &stored.password_encrypted) {
            (Some(username), Some(sealed)) => match self.vault.decrypt(sealed) {
                Some(password) => Some(PortalCredentials::new(username.clone(), password)),
                None => {
                    tracing::warn!(user_id, "Stored portal password is unusable");
                    None
                }
            },
            _ => None,
        };

        let can_reauthenticate = stored.can_reauthenticate();
        if let Some(session) = stored.session.filter(|s| !s.is_empty()) {
            let reauth_available = credentials.is_some();
            return Ok(Access::Ready(PortalAccess {
                user_id,
                session,
                credentials,
                reauth_available,
                refreshed: false,
            }));
        }

        let Some(credentials) = credentials else {
            let outcome = if can_reauthenticate {
                GradeFlowOutcome::ReconnectRequired { error: None }
            } else {
                GradeFlowOutcome::NotConnected
            };
            return Ok(Access::Unavailable(outcome));
        };

        tracing::info!(user_id, "No stored portal session, logging in");
        match self.login_and_store(user_id, &credentials).await? {
            Ok(session) => Ok(Access::Ready(PortalAccess {
                user_id,
                session,
                credentials: Some(credentials),
                reauth_available: false,
                refreshed: true,
            })),
            Err(error) => Ok(Access::Unavailable(
                GradeFlowOutcome::ReconnectRequired { error: Some(error) },
            )),
        }
    }

    /// Fetch grades, re-authenticating once if the budget allows.
    pub async fn fetch(
        &self,
        access: PortalAccess,
        params: &ExtractionParams,
    ) -> Result<GradeFlowOutcome> {
        let PortalAccess {
            user_id,
            session,
            credentials,
            mut reauth_available,
            mut refreshed,
        } = access;

        let mut state = FlowState::HaveCookies(session);
        loop {
            state = match state {
                FlowState::HaveCookies(session) => {
                    match self.extractor.fetch_grades(self.api, &session, params).await {
                        Ok(grades) => FlowState::Done(GradeFlowOutcome::Grades {
                            grades,
                            session_refreshed: refreshed,
                        }),
                        Err(PortalError::NoMatchingTerm { year, semester }) => {
                            FlowState::Done(GradeFlowOutcome::NoMatchingTerm { year, semester })
                        }
                        Err(error) if reauth_available && error.may_be_expired_session() => {
                            tracing::info!(
                                user_id,
                                error = %error,
                                kind = ?error.kind(),
                                "Grade fetch failed, re-authenticating"
                            );
                            FlowState::Reauthenticating(error)
                        }
                        Err(error) => {
                            tracing::warn!(user_id, error = %error, "Grade fetch failed");
                            FlowState::Done(GradeFlowOutcome::ReconnectRequired {
                                error: Some(error),
                            })
                        }
                    }
                }
                FlowState::Reauthenticating(cause) => {
                    reauth_available = false;
                    let Some(credentials) = credentials.as_ref() else {
                        return Ok(GradeFlowOutcome::ReconnectRequired { error: Some(cause) });
                    };
                    match self.login_and_store(user_id, credentials).await? {
                        Ok(session) => {
                            refreshed = true;
                            FlowState::HaveCookies(session)
                        }
                        Err(error) => {
                            FlowState::Done(GradeFlowOutcome::ReconnectRequired { error: Some(error) })
                        }
                    }
                }
                FlowState::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// Log in and persist the new cookies. The outer `Result` is storage,
    /// the inner one the portal.
    async fn login_and_store(
        &self,
        user_id: i64,
        credentials: &PortalCredentials,
    ) -> Result<std::result::Result<PortalSession, PortalError>> {
        match self.api.login(credentials).await {
            Ok(session) => {
                self.credentials.update_cookies(user_id, &session)?;
                tracing::info!(user_id, cookie_count = session.len(), "Portal session refreshed");
                Ok(Ok(session))
            }
            Err(error) => {
                tracing::warn!(user_id, error = %error, "Portal re-login failed");
                Ok(Err(error))
            }
        }
    }
}
