//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{AuthOutcome, SenseSafeApi};
use crate::error::{ApiError, PlatformError, StorageError};
use crate::model::{
    Credentials, GeoSample, LocationSubmission, RecordType, UserId, UserSummary,
};
use crate::platform::{
    Accuracy, DeviceIdentity, Dialer, LocationProvider, Notifier, PermissionPrompt,
    PermissionStatus, Platform,
};
use crate::registration::RegistrationRequest;
use crate::session::SessionState;
use crate::storage::KeyValueStore;
use crate::token::decode_payload;

/// 2100-01-01T00:00:00Z
pub const FAR_FUTURE: i64 = 4_102_444_800;

pub fn make_token(record_type: RecordType, id: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = json!({
        "email": {
            "id": id,
            "email": format!("user{id}@example.com"),
            "recordType": record_type,
            "sessionId": format!("session-{id}"),
            "expiresAt": "2100-01-01T00:00:00Z",
        },
        "iat": 1_700_000_000,
        "exp": exp,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

pub fn session_for(record_type: RecordType, id: &str) -> SessionState {
    let token = make_token(record_type, id, FAR_FUTURE);
    let payload = decode_payload(&token).expect("test token decodes");
    SessionState::authenticated(token, payload)
}

pub fn user(id: &str, first_name: &str, phone_number: Option<&str>) -> UserSummary {
    UserSummary {
        id: UserId::from(id),
        first_name: first_name.to_string(),
        last_name: "Souza".to_string(),
        email: format!("{}@example.com", first_name.to_lowercase()),
        phone_number: phone_number.map(str::to_string),
    }
}

/// Store whose every operation fails with an I/O error.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub token: Option<String>,
    pub patients: Vec<UserSummary>,
    pub parents: Vec<UserSummary>,
    pub latest: Option<GeoSample>,
    pub reject_login: bool,
    /// Submissions failing before the first success
    pub failing_submissions: AtomicUsize,
    pub submissions: Mutex<Vec<LocationSubmission>>,
    pub registrations: Mutex<Vec<RegistrationRequest>>,
}

impl FakeApi {
    pub fn submitted(&self) -> Vec<LocationSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    fn auth(&self) -> AuthOutcome {
        AuthOutcome {
            token: self.token.clone(),
            body: json!({"ok": true}),
        }
    }
}

#[async_trait]
impl SenseSafeApi for FakeApi {
    async fn register(&self, request: &RegistrationRequest) -> Result<AuthOutcome, ApiError> {
        self.registrations.lock().unwrap().push(request.clone());
        Ok(self.auth())
    }

    async fn login(&self, _credentials: &Credentials) -> Result<AuthOutcome, ApiError> {
        if self.reject_login {
            return Err(ApiError::Rejected {
                status: 401,
                message: "Invalid credentials".to_string(),
            });
        }
        Ok(self.auth())
    }

    async fn parent_patients(&self, _parent_id: &UserId) -> Result<Vec<UserSummary>, ApiError> {
        Ok(self.patients.clone())
    }

    async fn patient_parents(&self, _patient_id: &UserId) -> Result<Vec<UserSummary>, ApiError> {
        Ok(self.parents.clone())
    }

    async fn latest_location(&self, _patient_id: &UserId) -> Result<GeoSample, ApiError> {
        self.latest.clone().ok_or(ApiError::Rejected {
            status: 404,
            message: "No location".to_string(),
        })
    }

    async fn submit_location(&self, submission: &LocationSubmission) -> Result<(), ApiError> {
        let remaining = self.failing_submissions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_submissions.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::Transport("connection reset".to_string()));
        }
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(())
    }
}

pub struct FakePermission(pub PermissionStatus);

#[async_trait]
impl PermissionPrompt for FakePermission {
    async fn request_foreground_location(&self) -> PermissionStatus {
        self.0
    }
}

/// Returns `-23.55052, -46.633308`. The first `stalls` calls never resolve,
/// the next `failures` calls fail.
pub struct FakeLocation {
    calls: AtomicUsize,
    stalls: usize,
    failures: usize,
}

impl FakeLocation {
    pub fn new(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            stalls: 0,
            failures,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for FakeLocation {
    async fn current_position(&self, _accuracy: Accuracy) -> Result<GeoSample, PlatformError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.stalls {
            std::future::pending::<()>().await;
        }
        if call < self.stalls + self.failures {
            return Err(PlatformError::CommandFailed("no fix".to_string()));
        }
        Ok(GeoSample::new(-23.55052, -46.633308))
    }
}

/// Resolves the identifier after `delay`.
pub struct FakeIdentity {
    pub id: Option<String>,
    pub delay: Duration,
}

#[async_trait]
impl DeviceIdentity for FakeIdentity {
    async fn device_id(&self) -> Option<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.id.clone()
    }

    fn device_name(&self) -> Option<String> {
        Some("Test phone".to_string())
    }
}

#[derive(Default)]
pub struct RecordingDialer {
    pub urls: Mutex<Vec<String>>,
}

#[async_trait]
impl Dialer for RecordingDialer {
    async fn open_url(&self, url: &str) -> Result<(), PlatformError> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, title: &str, message: &str) {
        self.alerts
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

/// Fake collaborators, kept individually reachable for assertions.
pub struct FakePlatform {
    pub permission: Arc<FakePermission>,
    pub location: Arc<FakeLocation>,
    pub identity: Arc<FakeIdentity>,
    pub dialer: Arc<RecordingDialer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl FakePlatform {
    pub fn new(permission: PermissionStatus, identity_delay: Duration, location_failures: usize) -> Self {
        Self {
            permission: Arc::new(FakePermission(permission)),
            location: Arc::new(FakeLocation::new(location_failures)),
            identity: Arc::new(FakeIdentity {
                id: Some("device-1".to_string()),
                delay: identity_delay,
            }),
            dialer: Arc::new(RecordingDialer::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, Duration::ZERO, 0)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, Duration::ZERO, 0)
    }

    pub fn with_stalled_fixes(mut self, stalls: usize) -> Self {
        self.location = Arc::new(FakeLocation {
            calls: AtomicUsize::new(0),
            stalls,
            failures: 0,
        });
        self
    }

    pub fn platform(&self) -> Platform {
        Platform {
            permission: self.permission.clone(),
            location: self.location.clone(),
            identity: self.identity.clone(),
            dialer: self.dialer.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
