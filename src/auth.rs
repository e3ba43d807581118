//! Login and registration: call the backend, keep the issued token and
//! derive the session from it.

use crate::api::SenseSafeApi;
use crate::error::{SResult, SenseSafeError, ValidationError};
use crate::model::Credentials;
use crate::registration::RegistrationForm;
use crate::session::{SessionManager, SessionState};

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// The server issued a session cookie along with the new account
    SignedIn(SessionState),
    /// Account created, the user still has to log in
    Registered,
}

/// Sign in and persist the session.
///
/// # Errors
///
/// Empty credentials are rejected before any request. A login that succeeds
/// without a readable session cookie is an error and leaves no token behind.
pub async fn login(
    api: &dyn SenseSafeApi,
    sessions: &SessionManager,
    credentials: &Credentials,
) -> SResult<SessionState> {
    if credentials.email.trim().is_empty() {
        return Err(ValidationError::MissingField("Email").into());
    }
    if credentials.password.is_empty() {
        return Err(ValidationError::MissingField("Password").into());
    }

    let outcome = api.login(credentials).await?;
    let token = outcome.token.ok_or(SenseSafeError::MissingSessionCookie)?;
    let state = establish(sessions, token).await?;
    log::info!("[auth] signed in as {}", credentials.email.trim());
    Ok(state)
}

/// Validate the form locally, then create the account.
pub async fn register(
    api: &dyn SenseSafeApi,
    sessions: &SessionManager,
    form: &RegistrationForm,
) -> SResult<RegistrationOutcome> {
    let request = form.validate()?;
    let outcome = api.register(&request).await?;
    log::info!(
        "[auth] registered {} account {}",
        request.record_type(),
        request.account().email
    );

    match outcome.token {
        Some(token) => Ok(RegistrationOutcome::SignedIn(
            establish(sessions, token).await?,
        )),
        None => Ok(RegistrationOutcome::Registered),
    }
}

async fn establish(sessions: &SessionManager, token: String) -> SResult<SessionState> {
    let state = sessions.establish(token).await?;
    if state.payload.is_none() {
        return Err(SenseSafeError::UnreadableSessionToken);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::model::RecordType;
    use crate::registration::RegistrationRequest;
    use crate::storage::{KeyValueStore, MemoryStore, TOKEN_KEY};
    use crate::testing::{make_token, FakeApi, FAR_FUTURE};
    use std::sync::Arc;

    fn credentials() -> Credentials {
        Credentials {
            email: "ana@example.com".to_string(),
            password: "s3cret".to_string(),
        }
    }

    async fn signed_out(store: &Arc<MemoryStore>) -> SessionManager {
        let sessions = SessionManager::new(store.clone());
        sessions.initialize().await;
        sessions
    }

    fn patient_form() -> RegistrationForm {
        RegistrationForm {
            first_name: "Ana".to_string(),
            last_name: "Souza".to_string(),
            email: "ana@example.com".to_string(),
            password: "s3cret".to_string(),
            record_type: RecordType::Patient,
            parent_email: "mae@example.com".to_string(),
            serial_number: "android-1".to_string(),
            device_name: "Pixel".to_string(),
            latitude: "-23.55052".to_string(),
            longitude: "-46.633308".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_login_persists_session_across_relaunch() {
        let store = Arc::new(MemoryStore::new());
        let token = make_token(RecordType::Patient, "77", FAR_FUTURE);
        let api = FakeApi {
            token: Some(token.clone()),
            ..Default::default()
        };
        let sessions = signed_out(&store).await;

        let state = login(&api, &sessions, &credentials()).await.unwrap();
        assert_eq!(state.record_type(), Some(RecordType::Patient));
        assert_eq!(store.get_item(TOKEN_KEY).await.unwrap(), Some(token));

        let relaunched = SessionManager::new(store.clone()).initialize().await;
        assert_eq!(relaunched.payload, state.payload);
        assert_eq!(
            relaunched.payload.as_ref().map(|p| p.user_id().as_str()),
            Some("77")
        );
    }

    #[tokio::test]
    async fn test_rejected_login_keeps_existing_session() {
        let store = Arc::new(MemoryStore::new());
        let previous = make_token(RecordType::Parent, "1", FAR_FUTURE);
        store.set_item(TOKEN_KEY, &previous).await.unwrap();
        let sessions = signed_out(&store).await;
        let before = sessions.current();

        let api = FakeApi {
            reject_login: true,
            token: Some(make_token(RecordType::Patient, "2", FAR_FUTURE)),
            ..Default::default()
        };
        let result = login(&api, &sessions, &credentials()).await;

        assert!(matches!(
            result,
            Err(SenseSafeError::Api(ApiError::Rejected { status: 401, .. }))
        ));
        assert_eq!(store.get_item(TOKEN_KEY).await.unwrap(), Some(previous));
        assert_eq!(sessions.current(), before);
    }

    #[tokio::test]
    async fn test_login_without_cookie() {
        let store = Arc::new(MemoryStore::new());
        let sessions = signed_out(&store).await;

        let result = login(&FakeApi::default(), &sessions, &credentials()).await;
        assert!(matches!(result, Err(SenseSafeError::MissingSessionCookie)));
        assert_eq!(store.get_item(TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_with_unreadable_token() {
        let store = Arc::new(MemoryStore::new());
        let sessions = signed_out(&store).await;
        let api = FakeApi {
            token: Some("opaque-session-id".to_string()),
            ..Default::default()
        };

        let result = login(&api, &sessions, &credentials()).await;
        assert!(matches!(result, Err(SenseSafeError::UnreadableSessionToken)));
        assert_eq!(store.get_item(TOKEN_KEY).await.unwrap(), None);
        assert_eq!(sessions.current(), SessionState::signed_out());
    }

    #[tokio::test]
    async fn test_empty_credentials_are_not_sent() {
        let store = Arc::new(MemoryStore::new());
        let sessions = signed_out(&store).await;
        // a request would come back as a 401
        let api = FakeApi {
            reject_login: true,
            ..Default::default()
        };
        let blank = Credentials {
            email: "  ".to_string(),
            password: "x".to_string(),
        };

        let result = login(&api, &sessions, &blank).await;
        assert!(matches!(
            result,
            Err(SenseSafeError::Validation(ValidationError::MissingField("Email")))
        ));
    }

    #[tokio::test]
    async fn test_patient_without_parent_email_is_rejected_locally() {
        let store = Arc::new(MemoryStore::new());
        let sessions = signed_out(&store).await;
        let api = FakeApi {
            token: Some(make_token(RecordType::Patient, "5", FAR_FUTURE)),
            ..Default::default()
        };
        let form = RegistrationForm {
            parent_email: String::new(),
            ..patient_form()
        };

        let result = register(&api, &sessions, &form).await;
        assert!(matches!(
            result,
            Err(SenseSafeError::Validation(ValidationError::MissingParentEmail))
        ));
        assert!(api.registrations.lock().unwrap().is_empty());
        assert_eq!(store.get_item(TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_registration_signs_in() {
        let store = Arc::new(MemoryStore::new());
        let sessions = signed_out(&store).await;
        let api = FakeApi {
            token: Some(make_token(RecordType::Patient, "5", FAR_FUTURE)),
            ..Default::default()
        };

        let state = match register(&api, &sessions, &patient_form()).await.unwrap() {
            RegistrationOutcome::SignedIn(state) => state,
            other => panic!("expected a session, got {other:?}"),
        };
        assert_eq!(state.record_type(), Some(RecordType::Patient));
        assert!(store.get_item(TOKEN_KEY).await.unwrap().is_some());

        let sent = api.registrations.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            RegistrationRequest::Patient { parent_email, .. } if parent_email == "mae@example.com"
        ));
    }

    #[tokio::test]
    async fn test_registration_without_cookie() {
        let store = Arc::new(MemoryStore::new());
        let sessions = signed_out(&store).await;
        let api = FakeApi::default();

        let outcome = register(&api, &sessions, &patient_form()).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Registered);
        assert_eq!(api.registrations.lock().unwrap().len(), 1);
        assert_eq!(sessions.current(), SessionState::signed_out());
    }
}
