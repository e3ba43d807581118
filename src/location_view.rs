//! Parent-side patient selection and latest-location map view.

use serde::{Deserialize, Serialize};

use crate::api::SenseSafeApi;
use crate::error::{SResult, SenseSafeError};
use crate::guard;
use crate::model::{GeoSample, RecordType, UserSummary};
use crate::session::SessionState;

pub const LATITUDE_DELTA: f64 = 0.0922;
pub const LONGITUDE_DELTA: f64 = 0.0421;

/// Visible map area, centre plus span in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRegion {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl MapRegion {
    pub fn centered_on(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            latitude_delta: LATITUDE_DELTA,
            longitude_delta: LONGITUDE_DELTA,
        }
    }
}

impl Default for MapRegion {
    /// São Paulo city centre, shown until a location arrives.
    fn default() -> Self {
        Self::centered_on(-23.55052, -46.633308)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub latitude: f64,
    pub longitude: f64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationView {
    pub patient: UserSummary,
    pub region: MapRegion,
    pub marker: MapMarker,
    pub sample: GeoSample,
}

impl LocationView {
    pub fn new(patient: UserSummary, sample: GeoSample) -> Self {
        let marker = MapMarker {
            latitude: sample.latitude,
            longitude: sample.longitude,
            title: patient.display_name(),
        };
        Self {
            region: MapRegion::centered_on(sample.latitude, sample.longitude),
            marker,
            patient,
            sample,
        }
    }
}

/// Patients linked to the signed-in parent.
pub async fn list_patients(api: &dyn SenseSafeApi, session: &SessionState) -> SResult<Vec<UserSummary>> {
    let payload = guard::require_role(session, RecordType::Parent)?;
    Ok(api.parent_patients(payload.user_id()).await?)
}

/// Parents linked to the signed-in patient.
pub async fn list_parents(api: &dyn SenseSafeApi, session: &SessionState) -> SResult<Vec<UserSummary>> {
    let payload = guard::require_role(session, RecordType::Patient)?;
    Ok(api.patient_parents(payload.user_id()).await?)
}

/// Pick a patient by id, email or name (case-insensitive). With no query the
/// only linked patient is chosen.
pub fn select_patient<'a>(patients: &'a [UserSummary], query: Option<&str>) -> SResult<&'a UserSummary> {
    let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
        return match patients {
            [only] => Ok(only),
            [] => Err(SenseSafeError::UnknownPatient("no linked patients".to_string())),
            _ => Err(SenseSafeError::UnknownPatient(
                "several linked patients, pick one".to_string(),
            )),
        };
    };

    let needle = query.to_lowercase();
    patients
        .iter()
        .find(|p| p.id.as_str() == query)
        .or_else(|| patients.iter().find(|p| p.email.eq_ignore_ascii_case(query)))
        .or_else(|| {
            patients.iter().find(|p| {
                p.display_name().to_lowercase() == needle || p.first_name.to_lowercase() == needle
            })
        })
        .ok_or_else(|| SenseSafeError::UnknownPatient(query.to_string()))
}

/// Latest reported location of `patient`, framed for the map.
pub async fn load_location_view(
    api: &dyn SenseSafeApi,
    session: &SessionState,
    patient: &UserSummary,
) -> SResult<LocationView> {
    guard::require_role(session, RecordType::Parent)?;
    let sample = api.latest_location(&patient.id).await?;
    log::debug!(
        "[view] {} last seen at {:.5}, {:.5}",
        patient.display_name(),
        sample.latitude,
        sample.longitude
    );
    Ok(LocationView::new(patient.clone(), sample))
}
