// SenseSafe client library
// Session lifecycle, role routing and patient/parent operations against the SenseSafe backend

pub mod api;
pub mod auth;
pub mod emergency;
pub mod error;
pub mod guard;
pub mod live_status;
pub mod location_view;
pub mod map_view;
pub mod model;
pub mod platform;
pub mod registration;
pub mod reporter;
pub mod session;
pub mod storage;
pub mod token;

#[cfg(test)]
mod testing;

pub use api::{AuthOutcome, HttpApi, SenseSafeApi};
pub use error::{SResult, SenseSafeError};
pub use guard::{route_for, Route};
pub use model::{GeoSample, RecordType, SessionPayload, UserId, UserSummary};
pub use registration::{RegistrationForm, RegistrationRequest};
pub use reporter::{LocationReporter, ReporterConfig, ReporterHandle, ReporterState};
pub use session::{SessionManager, SessionState};
pub use storage::{JsonFileStore, KeyValueStore};
