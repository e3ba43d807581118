use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::model::RecordType;
use crate::platform::{Accuracy, PermissionStatus, Platform};

const UNKNOWN_DEVICE_NAME: &str = "Unknown device";
const UNKNOWN_DEVICE_ID: &str = "unknown_platform_id";

/// Raw registration form. Coordinates stay decimal strings until submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub record_type: RecordType,
    pub parent_email: String,
    pub phone_number: String,
    pub serial_number: String,
    pub device_name: String,
    pub latitude: String,
    pub longitude: String,
}

impl Default for RegistrationForm {
    fn default() -> Self {
        Self {
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            password: String::new(),
            record_type: RecordType::Patient,
            parent_email: String::new(),
            phone_number: String::new(),
            serial_number: String::new(),
            device_name: String::new(),
            latitude: String::new(),
            longitude: String::new(),
        }
    }
}

/// Fields shared by both roles.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFields {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AccountFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountFields")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Device registered alongside a patient account.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub serial_number: String,
    pub device_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Body of `POST /auth/register`, tagged by `recordType`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "recordType")]
pub enum RegistrationRequest {
    #[serde(rename = "PATIENT")]
    Patient {
        #[serde(flatten)]
        account: AccountFields,
        #[serde(rename = "parentEmail")]
        parent_email: String,
        #[serde(flatten)]
        device: DeviceRegistration,
    },
    #[serde(rename = "PARENT")]
    Parent {
        #[serde(flatten)]
        account: AccountFields,
        #[serde(rename = "phoneNumber")]
        phone_number: String,
    },
}

impl RegistrationRequest {
    pub fn record_type(&self) -> RecordType {
        match self {
            RegistrationRequest::Patient { .. } => RecordType::Patient,
            RegistrationRequest::Parent { .. } => RecordType::Parent,
        }
    }

    pub fn account(&self) -> &AccountFields {
        match self {
            RegistrationRequest::Patient { account, .. } => account,
            RegistrationRequest::Parent { account, .. } => account,
        }
    }
}

/// How the device fields of a form were filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefillOutcome {
    Filled,
    PermissionDenied,
    LocationUnavailable,
    /// Parent forms carry no device fields
    NotApplicable,
}

/// Decimal text for a coordinate; parses back to the identical `f64`.
pub fn format_coordinate(value: f64) -> String {
    value.to_string()
}

pub fn parse_coordinate(field: &'static str, text: &str) -> Result<f64, ValidationError> {
    let invalid = || ValidationError::InvalidCoordinate {
        field,
        value: text.to_string(),
    };
    let value: f64 = text.trim().parse().map_err(|_| invalid())?;
    let limit = if field == "latitude" { 90.0 } else { 180.0 };
    if !value.is_finite() || value.abs() > limit {
        return Err(invalid());
    }
    Ok(value)
}

fn required(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(value.to_string())
    }
}

impl RegistrationForm {
    /// Check the form and build the role-specific request. Nothing is sent on failure.
    pub fn validate(&self) -> Result<RegistrationRequest, ValidationError> {
        let first_name = required("First name", &self.first_name)?;
        let last_name = required("Last name", &self.last_name)?;
        let email = required("Email", &self.email)?;
        if self.password.is_empty() {
            return Err(ValidationError::MissingField("Password"));
        }
        let account = AccountFields {
            first_name,
            last_name,
            email,
            password: self.password.clone(),
        };

        match self.record_type {
            RecordType::Patient => {
                let parent_email = self.parent_email.trim();
                if parent_email.is_empty() {
                    return Err(ValidationError::MissingParentEmail);
                }
                if [
                    &self.serial_number,
                    &self.device_name,
                    &self.latitude,
                    &self.longitude,
                ]
                .iter()
                .any(|field| field.trim().is_empty())
                {
                    return Err(ValidationError::MissingDeviceInfo);
                }

                let device = DeviceRegistration {
                    serial_number: self.serial_number.trim().to_string(),
                    device_name: self.device_name.trim().to_string(),
                    latitude: parse_coordinate("latitude", &self.latitude)?,
                    longitude: parse_coordinate("longitude", &self.longitude)?,
                };

                Ok(RegistrationRequest::Patient {
                    account,
                    parent_email: parent_email.to_string(),
                    device,
                })
            }
            RecordType::Parent => {
                let phone_number = self.phone_number.trim();
                if phone_number.is_empty() {
                    return Err(ValidationError::MissingPhoneNumber);
                }
                Ok(RegistrationRequest::Parent {
                    account,
                    phone_number: phone_number.to_string(),
                })
            }
        }
    }

    fn clear_device_fields(&mut self) {
        self.serial_number.clear();
        self.device_name.clear();
        self.latitude.clear();
        self.longitude.clear();
    }

    /// Fill the patient device fields from the platform.
    ///
    /// Name and identifier are always filled (with placeholders when unknown).
    /// Coordinates are only filled when permission is granted and a fix is
    /// obtained; otherwise the user is told why and they stay empty.
    pub async fn prefill_device_info(&mut self, platform: &Platform) -> PrefillOutcome {
        if self.record_type != RecordType::Patient {
            self.clear_device_fields();
            return PrefillOutcome::NotApplicable;
        }

        self.device_name = platform
            .identity
            .device_name()
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
        self.serial_number = platform
            .identity
            .device_id()
            .await
            .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string());
        self.latitude.clear();
        self.longitude.clear();

        if platform.permission.request_foreground_location().await != PermissionStatus::Granted {
            platform.notifier.alert(
                "Permission required",
                "To register as a patient we need location permission. Please enable it in the app settings.",
            );
            return PrefillOutcome::PermissionDenied;
        }

        match platform.location.current_position(Accuracy::High).await {
            Ok(sample) => {
                self.latitude = format_coordinate(sample.latitude);
                self.longitude = format_coordinate(sample.longitude);
                PrefillOutcome::Filled
            }
            Err(e) => {
                log::error!("[registration] failed to read device location: {e}");
                platform.notifier.alert(
                    "Error",
                    "Could not read device information or location. Check the permissions.",
                );
                PrefillOutcome::LocationUnavailable
            }
        }
    }
}
