//! Patient emergency call: dial the first linked parent with a phone number.

use crate::api::SenseSafeApi;
use crate::error::SResult;
use crate::guard;
use crate::model::{RecordType, UserSummary};
use crate::platform::Platform;
use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq)]
pub enum EmergencyOutcome {
    Dialed { parent: UserSummary, url: String },
    /// No linked parent has a usable phone number; the user was notified
    NoContact,
}

/// First parent whose phone number has at least one digit.
pub fn emergency_contact(parents: &[UserSummary]) -> Option<(&UserSummary, String)> {
    parents.iter().find_map(|parent| {
        let number = dialable(parent.phone_number.as_deref()?)?;
        Some((parent, number))
    })
}

/// Keep digits and a leading `+`, drop spaces and punctuation.
fn dialable(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let mut number: String = raw.chars().filter(char::is_ascii_digit).collect();
    if number.is_empty() {
        return None;
    }
    if raw.starts_with('+') {
        number.insert(0, '+');
    }
    Some(number)
}

/// Look up the patient's parents and open the dialer on the first reachable one.
///
/// # Errors
///
/// Fails for non-patient sessions, API failures and dialer failures.
pub async fn trigger_emergency(
    api: &dyn SenseSafeApi,
    platform: &Platform,
    session: &SessionState,
) -> SResult<EmergencyOutcome> {
    let payload = guard::require_role(session, RecordType::Patient)?;
    let parents = api.patient_parents(payload.user_id()).await?;

    let Some((parent, number)) = emergency_contact(&parents) else {
        log::warn!(
            "[emergency] none of {} linked parents has a phone number",
            parents.len()
        );
        platform.notifier.alert(
            "Emergency",
            "No linked parent has a phone number to call.",
        );
        return Ok(EmergencyOutcome::NoContact);
    };

    let url = format!("tel:{number}");
    log::info!("[emergency] calling {} at {number}", parent.display_name());
    platform.dialer.open_url(&url).await?;

    Ok(EmergencyOutcome::Dialed {
        parent: parent.clone(),
        url,
    })
}
