//! Phone/OTP authentication state machine.
//!
//! `idle → requesting → awaiting code → verifying → verified`, with
//! `failed` reachable from both remote calls and resend looping back to
//! `requesting`. Remote errors land in `last_error` verbatim so the UI
//! can display exactly what the server said. The core never retries on
//! its own; retry is the user resending or re-verifying.

use std::sync::Arc;

use dms_api::ApiError;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::remote::RemoteApi;
use crate::session::{Session, SessionStore};

/// Challenge lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpStatus {
    Idle,
    Requesting,
    AwaitingCode,
    Verifying,
    Verified,
    Failed,
}

/// Snapshot of the current challenge, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    pub phone_number: String,
    pub status: OtpStatus,
    pub last_error: Option<String>,
}

/// Identity fields from the validate-OTP envelope. Returned to the caller
/// for the profile surface; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub subject_id: Option<String>,
    pub display_name: Option<String>,
    pub roles: Vec<String>,
}

struct ChallengeState {
    phone_number: String,
    status: OtpStatus,
    last_error: Option<String>,
    /// Whether a code was ever sent for this challenge. A failed *request*
    /// leaves nothing to verify; a failed *verify* may be retried.
    code_sent: bool,
}

/// Drives the phone-number → OTP-request → OTP-verify flow and hands the
/// resulting token to the [`SessionStore`].
pub struct OtpChallengeManager<A: RemoteApi> {
    api: Arc<A>,
    sessions: Arc<SessionStore>,
    code_length: usize,
    state: Mutex<ChallengeState>,
}

impl<A: RemoteApi> OtpChallengeManager<A> {
    pub fn new(api: Arc<A>, sessions: Arc<SessionStore>, code_length: usize) -> Self {
        Self {
            api,
            sessions,
            code_length,
            state: Mutex::new(ChallengeState {
                phone_number: String::new(),
                status: OtpStatus::Idle,
                last_error: None,
                code_sent: false,
            }),
        }
    }

    /// Current challenge snapshot.
    pub async fn challenge(&self) -> OtpChallenge {
        let state = self.state.lock().await;
        OtpChallenge {
            phone_number: state.phone_number.clone(),
            status: state.status,
            last_error: state.last_error.clone(),
        }
    }

    /// Ask the backend to send an OTP to the given phone number.
    ///
    /// Valid from `Idle` or `Failed`. A call that finds another request
    /// already in flight returns without issuing a second remote call.
    pub async fn request_code(&self, phone_number: &str) -> CoreResult<()> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return Err(CoreError::validation(
                "phone_number",
                "phone number is required",
            ));
        }

        {
            let mut state = self.state.lock().await;
            match state.status {
                // Another call is already driving the remote operation.
                OtpStatus::Requesting | OtpStatus::Verifying => return Ok(()),
                OtpStatus::Idle | OtpStatus::Failed => {}
                other => {
                    return Err(CoreError::State(format!(
                        "cannot request a code from {other:?}"
                    )))
                }
            }
            state.status = OtpStatus::Requesting;
            state.phone_number = phone_number.to_string();
            state.last_error = None;
            state.code_sent = false;
        }

        self.drive_request(phone_number).await
    }

    /// Re-send the code to the phone number already on the challenge.
    ///
    /// Valid from `AwaitingCode` or `Failed`; equivalent to invoking
    /// [`request_code`](Self::request_code) again with the same number.
    pub async fn resend(&self) -> CoreResult<()> {
        let phone_number = {
            let mut state = self.state.lock().await;
            match state.status {
                OtpStatus::Requesting | OtpStatus::Verifying => return Ok(()),
                OtpStatus::AwaitingCode | OtpStatus::Failed => {}
                other => {
                    return Err(CoreError::State(format!("cannot resend from {other:?}")))
                }
            }
            if state.phone_number.is_empty() {
                return Err(CoreError::State(
                    "no phone number on the current challenge".into(),
                ));
            }
            state.status = OtpStatus::Requesting;
            state.last_error = None;
            state.phone_number.clone()
        };

        self.drive_request(&phone_number).await
    }

    async fn drive_request(&self, phone_number: &str) -> CoreResult<()> {
        let result = self.api.generate_otp(phone_number).await;

        let mut state = self.state.lock().await;
        // A reset while the call was in flight discards the outcome.
        if state.status != OtpStatus::Requesting {
            return Ok(());
        }
        match result {
            Ok(()) => {
                debug!("OTP sent");
                state.status = OtpStatus::AwaitingCode;
                state.code_sent = true;
                Ok(())
            }
            Err(err) => {
                let message = remote_message(&err);
                warn!(error = %message, "OTP request failed");
                state.status = OtpStatus::Failed;
                state.last_error = Some(message);
                Err(err.into())
            }
        }
    }

    /// Verify the entered code; on success the session token is persisted
    /// and the challenge is complete.
    ///
    /// Valid from `AwaitingCode` or `Failed` (retry without restarting).
    pub async fn verify_code(&self, code: &str) -> CoreResult<(Session, AuthUser)> {
        let code = code.trim();
        if code.len() != self.code_length || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoreError::validation(
                "otp",
                format!("code must be {} digits", self.code_length),
            ));
        }

        let phone_number = {
            let mut state = self.state.lock().await;
            match state.status {
                OtpStatus::Requesting | OtpStatus::Verifying => return Err(CoreError::Busy),
                OtpStatus::AwaitingCode | OtpStatus::Failed if state.code_sent => {}
                OtpStatus::AwaitingCode | OtpStatus::Failed => {
                    return Err(CoreError::State(
                        "no code has been sent for this challenge".into(),
                    ))
                }
                other => {
                    return Err(CoreError::State(format!("cannot verify from {other:?}")))
                }
            }
            if state.phone_number.is_empty() {
                return Err(CoreError::State(
                    "no phone number on the current challenge".into(),
                ));
            }
            state.status = OtpStatus::Verifying;
            state.last_error = None;
            state.phone_number.clone()
        };

        let result = self.api.validate_otp(&phone_number, code).await;

        let auth = match result {
            Ok(auth) => auth,
            Err(err) => {
                let message = remote_message(&err);
                warn!(error = %message, "OTP verification failed");
                let mut state = self.state.lock().await;
                if state.status == OtpStatus::Verifying {
                    // Keep the phone number so the user can resend
                    // without re-entering it.
                    state.status = OtpStatus::Failed;
                    state.last_error = Some(message);
                }
                return Err(err.into());
            }
        };

        let mut session = match self.sessions.save(&auth.token).await {
            Ok(session) => session,
            Err(err) => {
                let mut state = self.state.lock().await;
                if state.status == OtpStatus::Verifying {
                    state.status = OtpStatus::Failed;
                    state.last_error = Some(err.to_string());
                }
                return Err(err);
            }
        };
        if session.subject_id.is_none() {
            session.subject_id = auth.user_id.clone();
        }

        let user = AuthUser {
            subject_id: session.subject_id.clone(),
            display_name: auth.user_name,
            roles: auth.roles,
        };

        let mut state = self.state.lock().await;
        if state.status == OtpStatus::Verifying {
            state.status = OtpStatus::Verified;
        }
        debug!(subject = ?user.subject_id, "OTP verified, session established");
        Ok((session, user))
    }

    /// Abandon the current challenge and return to `Idle`.
    ///
    /// An in-flight remote call finishes but its outcome is discarded.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.status = OtpStatus::Idle;
        state.phone_number.clear();
        state.last_error = None;
        state.code_sent = false;
    }
}

/// The server message verbatim, falling back to the transport rendering.
fn remote_message(err: &ApiError) -> String {
    match err {
        ApiError::Api(message) if !message.is_empty() => message.clone(),
        other => other.to_string(),
    }
}
