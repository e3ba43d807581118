//! Role-gated navigation policy shared by every screen and command.

use serde::Serialize;

use crate::error::{SResult, SenseSafeError};
use crate::model::{RecordType, SessionPayload};
use crate::session::SessionState;

/// Destinations in the client's navigation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Route {
    Login,
    Registration,
    /// Parent picks which linked patient to look at
    UserSelection,
    ViewLocation,
    /// Patient home: location reporting plus the emergency action
    PatientHome,
}

impl Route {
    /// Role a session must hold to stay on this route, if any.
    pub fn required_role(&self) -> Option<RecordType> {
        match self {
            Route::Login | Route::Registration => None,
            Route::UserSelection | Route::ViewLocation => Some(RecordType::Parent),
            Route::PatientHome => Some(RecordType::Patient),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Route::Login => "Login",
            Route::Registration => "Registration",
            Route::UserSelection => "Select user",
            Route::ViewLocation => "Live location",
            Route::PatientHome => "Emergency",
        }
    }
}

/// Landing route for a resolved session. `None` while the session is still loading.
pub fn route_for(state: &SessionState) -> Option<Route> {
    if state.is_loading {
        return None;
    }
    Some(match state.record_type() {
        Some(RecordType::Parent) => Route::UserSelection,
        Some(RecordType::Patient) => Route::PatientHome,
        None => Route::Login,
    })
}

/// Decide where a request for `requested` actually lands.
///
/// Public routes are always admitted. Role-gated routes are admitted only for
/// the matching role; anyone else is sent to their own landing route.
pub fn admit(state: &SessionState, requested: Route) -> Option<Route> {
    let landing = route_for(state)?;
    match requested.required_role() {
        None => Some(requested),
        Some(role) if state.record_type() == Some(role) => Some(requested),
        Some(_) => Some(landing),
    }
}

/// Admit `route` or explain why not.
///
/// # Errors
///
/// `NotAuthenticated` while loading or signed out, `WrongRole` when the
/// route belongs to the other role.
pub fn enter(state: &SessionState, route: Route) -> SResult<()> {
    if admit(state, route) == Some(route) {
        return Ok(());
    }
    match route.required_role() {
        Some(role) => require_role(state, role).map(|_| ()),
        None => Err(SenseSafeError::NotAuthenticated),
    }
}

/// Payload of a session holding `role`, for operations restricted to it.
pub fn require_role(state: &SessionState, role: RecordType) -> SResult<&SessionPayload> {
    let payload = state
        .payload
        .as_ref()
        .filter(|_| !state.is_loading)
        .ok_or(SenseSafeError::NotAuthenticated)?;
    if payload.record_type() != role {
        return Err(SenseSafeError::WrongRole {
            expected: role,
            actual: payload.record_type(),
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::session_for;

    #[test]
    fn test_loading_has_no_route() {
        assert_eq!(route_for(&SessionState::loading()), None);
        assert_eq!(admit(&SessionState::loading(), Route::ViewLocation), None);
    }

    #[test]
    fn test_landing_routes() {
        assert_eq!(route_for(&SessionState::signed_out()), Some(Route::Login));
        assert_eq!(
            route_for(&session_for(RecordType::Parent, "1")),
            Some(Route::UserSelection)
        );
        assert_eq!(
            route_for(&session_for(RecordType::Patient, "2")),
            Some(Route::PatientHome)
        );
    }

    #[test]
    fn test_admit_redirects_wrong_role() {
        let patient = session_for(RecordType::Patient, "2");
        let parent = session_for(RecordType::Parent, "1");
        let nobody = SessionState::signed_out();

        assert_eq!(admit(&patient, Route::ViewLocation), Some(Route::PatientHome));
        assert_eq!(admit(&parent, Route::ViewLocation), Some(Route::ViewLocation));
        assert_eq!(admit(&parent, Route::PatientHome), Some(Route::UserSelection));
        assert_eq!(admit(&nobody, Route::UserSelection), Some(Route::Login));
        assert_eq!(admit(&patient, Route::Login), Some(Route::Login));
        assert_eq!(admit(&nobody, Route::Registration), Some(Route::Registration));
    }

    #[test]
    fn test_enter_checks_every_command_route() {
        let patient = session_for(RecordType::Patient, "2");
        let parent = session_for(RecordType::Parent, "1");
        let nobody = SessionState::signed_out();

        assert!(enter(&parent, Route::UserSelection).is_ok());
        assert!(enter(&parent, Route::ViewLocation).is_ok());
        assert!(enter(&patient, Route::PatientHome).is_ok());
        assert!(enter(&nobody, Route::Registration).is_ok());
        assert!(enter(&patient, Route::Login).is_ok());

        assert!(matches!(
            enter(&patient, Route::ViewLocation),
            Err(SenseSafeError::WrongRole {
                expected: RecordType::Parent,
                actual: RecordType::Patient
            })
        ));
        assert!(matches!(
            enter(&parent, Route::PatientHome),
            Err(SenseSafeError::WrongRole { .. })
        ));
        assert!(matches!(
            enter(&nobody, Route::UserSelection),
            Err(SenseSafeError::NotAuthenticated)
        ));
        assert!(matches!(
            enter(&SessionState::loading(), Route::Registration),
            Err(SenseSafeError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_require_role() {
        let patient = session_for(RecordType::Patient, "2");
        assert_eq!(
            require_role(&patient, RecordType::Patient)
                .unwrap()
                .user_id()
                .as_str(),
            "2"
        );
        assert!(matches!(
            require_role(&patient, RecordType::Parent),
            Err(SenseSafeError::WrongRole { .. })
        ));
        assert!(matches!(
            require_role(&SessionState::signed_out(), RecordType::Parent),
            Err(SenseSafeError::NotAuthenticated)
        ));
    }
}
