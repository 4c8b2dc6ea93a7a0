use std::{collections::BTreeMap, time::Duration};

use ciborium::value::Value;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;
use tracing::{info, instrument, trace};

use super::{enrollment::EnrollmentContext, modality, BioEnrollment};
use crate::{
    cbor::{
        args::{bytes_value, value_to_u64},
        pack_args, to_canonical_vec, ResponseMap,
    },
    client_pin::PinUvToken,
    ctap::{params::BioEnrollmentParams, session::Ctap2Session, state::CommandState},
    error::{Error, Result},
};

mod sub_command {
    pub const ENROLL_BEGIN: u8 = 0x01;
    pub const ENROLL_CAPTURE_NEXT_SAMPLE: u8 = 0x02;
    pub const CANCEL_CURRENT_ENROLLMENT: u8 = 0x03;
    pub const ENUMERATE_ENROLLMENTS: u8 = 0x04;
    pub const SET_FRIENDLY_NAME: u8 = 0x05;
    pub const REMOVE_ENROLLMENT: u8 = 0x06;
    pub const GET_FINGERPRINT_SENSOR_INFO: u8 = 0x07;
}

mod result {
    pub const FINGERPRINT_KIND: u64 = 0x02;
    pub const MAX_CAPTURE_SAMPLES_REQUIRED_FOR_ENROLL: u64 = 0x03;
    pub const TEMPLATE_ID: u64 = 0x04;
    pub const LAST_ENROLL_SAMPLE_STATUS: u64 = 0x05;
    pub const REMAINING_SAMPLES: u64 = 0x06;
    pub const TEMPLATE_INFOS: u64 = 0x07;
    pub const MAX_TEMPLATE_FRIENDLY_NAME: u64 = 0x08;
}

mod template_info {
    pub const ID: u64 = 0x01;
    pub const NAME: u64 = 0x02;
}

/// Feedback on the last fingerprint sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SampleStatus {
    Good = 0x00,
    TooHigh = 0x01,
    TooLow = 0x02,
    TooLeft = 0x03,
    TooRight = 0x04,
    TooFast = 0x05,
    TooSlow = 0x06,
    PoorQuality = 0x07,
    TooSkewed = 0x08,
    TooShort = 0x09,
    MergeFailure = 0x0A,
    /// The finger is already enrolled.
    Exists = 0x0B,
    NoUserActivity = 0x0D,
    NoUserPresenceTransition = 0x0E,
}

/// A rejected fingerprint sample. The user should be prompted and the capture retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Fingerprint sample rejected with feedback 0x{code:02x}")]
pub struct CaptureError {
    code: u8,
}

impl CaptureError {
    pub fn new(code: u8) -> Self {
        CaptureError { code }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    /// The known feedback behind [Self::code], if any.
    pub fn status(&self) -> Option<SampleStatus> {
        SampleStatus::try_from(self.code).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FingerprintKind {
    Touch = 0x01,
    Swipe = 0x02,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub fingerprint_kind: FingerprintKind,
    pub max_capture_samples_required_for_enroll: u64,
    pub max_template_friendly_name: Option<u64>,
}

/// Outcome of one captured sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStatus {
    pub sample_status: u8,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollBeginStatus {
    pub template_id: Vec<u8>,
    pub status: CaptureStatus,
}

enum Auth {
    None,
    /// Protocol version without a signature, as enrollment cancellation expects.
    ProtocolOnly,
    Signed,
}

/// Fingerprint enrollment authorized by a token with the bio enrollment permission.
pub struct FingerprintBioEnrollment<'a> {
    bio: BioEnrollment<'a>,
    token: PinUvToken,
}

impl<'a> FingerprintBioEnrollment<'a> {
    pub async fn new(session: &'a mut Ctap2Session, token: PinUvToken) -> Result<Self> {
        let bio = BioEnrollment::new(session, modality::FINGERPRINT).await?;
        Ok(FingerprintBioEnrollment { bio, token })
    }

    async fn call(
        &mut self,
        sub_command: u8,
        sub_command_params: Option<Value>,
        auth: Auth,
        state: Option<&CommandState>,
    ) -> Result<Option<ResponseMap>> {
        let modality = self.bio.modality();
        let mut params = BioEnrollmentParams {
            modality: Some(modality),
            sub_command: Some(sub_command),
            ..Default::default()
        };
        match auth {
            Auth::None => {}
            Auth::ProtocolOnly => {
                params.pin_uv_auth_protocol = Some(self.token.protocol().version());
            }
            Auth::Signed => {
                let mut message = vec![modality, sub_command];
                if let Some(sub_command_params) = &sub_command_params {
                    message.extend(to_canonical_vec(sub_command_params.clone())?);
                }
                params.pin_uv_auth_protocol = Some(self.token.protocol().version());
                params.pin_uv_auth_param = Some(self.token.authenticate(&message));
            }
        }
        params.sub_command_params = sub_command_params;
        self.bio.session().bio_enrollment(&params, state).await
    }

    fn require_data(response: Option<ResponseMap>, what: &str) -> Result<ResponseMap> {
        response.ok_or_else(|| Error::bad_response(format!("{} returned no data", what)))
    }

    pub async fn get_sensor_info(&mut self) -> Result<SensorInfo> {
        let response = self
            .call(sub_command::GET_FINGERPRINT_SENSOR_INFO, None, Auth::None, None)
            .await?;
        let response = Self::require_data(response, "getFingerprintSensorInfo")?;
        let kind = response.require_uint(result::FINGERPRINT_KIND)?;
        let fingerprint_kind = u8::try_from(kind)
            .ok()
            .and_then(|kind| FingerprintKind::try_from(kind).ok())
            .ok_or_else(|| Error::bad_response(format!("Unknown fingerprint kind {}", kind)))?;
        Ok(SensorInfo {
            fingerprint_kind,
            max_capture_samples_required_for_enroll: response
                .require_uint(result::MAX_CAPTURE_SAMPLES_REQUIRED_FOR_ENROLL)?,
            max_template_friendly_name: response.uint(result::MAX_TEMPLATE_FRIENDLY_NAME)?,
        })
    }

    fn capture_status(response: &ResponseMap) -> Result<CaptureStatus> {
        let sample_status = response.require_uint(result::LAST_ENROLL_SAMPLE_STATUS)?;
        Ok(CaptureStatus {
            sample_status: u8::try_from(sample_status).map_err(|_| {
                Error::bad_response(format!("Sample status {} out of range", sample_status))
            })?,
            remaining: response.require_uint(result::REMAINING_SAMPLES)?,
        })
    }

    fn timeout_param(timeout: Option<Duration>) -> Option<Value> {
        timeout.map(|t| Value::from(t.as_millis() as u64))
    }

    /// Starts a new enrollment and waits for the first sample.
    #[instrument(skip(self, state))]
    pub async fn enroll_begin(
        &mut self,
        timeout: Option<Duration>,
        state: Option<&CommandState>,
    ) -> Result<EnrollBeginStatus> {
        // templateId, friendlyName, timeoutMilliseconds; always sent, even when empty
        let params = pack_args([None, None, Self::timeout_param(timeout)]);
        let response = self
            .call(sub_command::ENROLL_BEGIN, Some(params), Auth::Signed, state)
            .await?;
        let response = Self::require_data(response, "enrollBegin")?;
        let begin = EnrollBeginStatus {
            template_id: response.require_bytes(result::TEMPLATE_ID)?.to_vec(),
            status: Self::capture_status(&response)?,
        };
        trace!(?begin, "Enrollment started");
        Ok(begin)
    }

    /// Captures the next sample of the enrollment of `template_id`.
    #[instrument(skip(self, template_id, state))]
    pub async fn enroll_capture_next(
        &mut self,
        template_id: &[u8],
        timeout: Option<Duration>,
        state: Option<&CommandState>,
    ) -> Result<CaptureStatus> {
        let params = pack_args([Some(bytes_value(template_id)), None, Self::timeout_param(timeout)]);
        let response = self
            .call(
                sub_command::ENROLL_CAPTURE_NEXT_SAMPLE,
                Some(params),
                Auth::Signed,
                state,
            )
            .await?;
        let status = Self::capture_status(&Self::require_data(response, "enrollCaptureNextSample")?)?;
        trace!(?status, "Captured sample");
        Ok(status)
    }

    /// Aborts an enrollment capture in progress.
    pub async fn enroll_cancel(&mut self) -> Result<()> {
        self.call(
            sub_command::CANCEL_CURRENT_ENROLLMENT,
            None,
            Auth::ProtocolOnly,
            None,
        )
        .await?;
        Ok(())
    }

    /// Starts a context that drives a whole enrollment, see [EnrollmentContext].
    pub fn enroll(&mut self, timeout: Option<Duration>) -> EnrollmentContext<'_, 'a> {
        EnrollmentContext::new(self, timeout)
    }

    /// Lists enrolled templates and their friendly names.
    #[instrument(skip(self))]
    pub async fn enumerate_enrollments(&mut self) -> Result<BTreeMap<Vec<u8>, Option<String>>> {
        let response = match self
            .call(sub_command::ENUMERATE_ENROLLMENTS, None, Auth::Signed, None)
            .await
        {
            Ok(response) => response,
            // reported when nothing is enrolled
            Err(Error::Ctap(e)) if e.is_invalid_option() => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };
        let infos: &[Value] = match &response {
            Some(response) => response.array(result::TEMPLATE_INFOS)?.unwrap_or_default(),
            None => &[],
        };

        let mut enrollments = BTreeMap::new();
        for entry in infos {
            let entry = entry
                .as_map()
                .ok_or_else(|| Error::bad_response("Template info should be a map"))?;
            let field = |key: u64| {
                entry
                    .iter()
                    .find(|(k, _)| value_to_u64(k) == Some(key))
                    .map(|(_, v)| v)
            };
            let id = field(template_info::ID)
                .and_then(Value::as_bytes)
                .ok_or_else(|| Error::bad_response("Template info without an ID"))?;
            let name = field(template_info::NAME)
                .and_then(Value::as_text)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned);
            enrollments.insert(id.clone(), name);
        }
        Ok(enrollments)
    }

    #[instrument(skip(self, template_id))]
    pub async fn set_name(&mut self, template_id: &[u8], name: &str) -> Result<()> {
        let params = pack_args([Some(bytes_value(template_id)), Some(Value::from(name))]);
        self.call(sub_command::SET_FRIENDLY_NAME, Some(params), Auth::Signed, None)
            .await?;
        info!(template_id = %hex::encode(template_id), "Fingerprint template renamed");
        Ok(())
    }

    pub async fn remove_enrollment(&mut self, template_id: &[u8]) -> Result<()> {
        let params = pack_args([Some(bytes_value(template_id))]);
        self.call(sub_command::REMOVE_ENROLLMENT, Some(params), Auth::Signed, None)
            .await?;
        info!(template_id = %hex::encode(template_id), "Fingerprint template removed");
        Ok(())
    }
}
