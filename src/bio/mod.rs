//! authenticatorBioEnrollment.
pub mod enrollment;
pub mod fingerprint;

use tracing::{debug, instrument};

use crate::{
    ctap::{
        info::{InfoData, FIDO_2_1_PRE},
        params::BioEnrollmentParams,
        session::Ctap2Session,
    },
    error::{Error, Result},
};

/// Biometric modality identifiers.
pub mod modality {
    pub const FINGERPRINT: u8 = 0x01;
}

mod result {
    pub const MODALITY: u64 = 0x01;
}

/// Bio enrollment for one modality, checked against what the authenticator reports.
pub struct BioEnrollment<'a> {
    session: &'a mut Ctap2Session,
    modality: u8,
}

impl<'a> BioEnrollment<'a> {
    /// Whether bio enrollment is available, either as the CTAP 2.1 command or as the
    /// FIDO_2_1_PRE preview.
    pub fn is_supported(info: &InfoData) -> bool {
        info.has_option("bioEnroll")
            || (info.supports_version(FIDO_2_1_PRE)
                && info.has_option("userVerificationMgmtPreview"))
    }

    /// Fails when the authenticator lacks bio enrollment, or reports a modality other
    /// than `modality`.
    #[instrument(skip(session))]
    pub async fn new(session: &'a mut Ctap2Session, modality: u8) -> Result<BioEnrollment<'a>> {
        if !Self::is_supported(session.cached_info()) {
            return Err(Error::NotSupported("Bio enrollment"));
        }
        let reported = Self::get_modality(session).await?;
        if reported != modality {
            return Err(Error::UnsupportedModality {
                requested: modality,
                reported,
            });
        }
        debug!(modality, "Bio enrollment available");
        Ok(BioEnrollment { session, modality })
    }

    /// Asks the authenticator which modality it enrolls.
    pub async fn get_modality(session: &mut Ctap2Session) -> Result<u8> {
        let params = BioEnrollmentParams {
            get_modality: Some(true),
            ..Default::default()
        };
        let response = session
            .bio_enrollment(&params, None)
            .await?
            .ok_or_else(|| Error::bad_response("getModality returned no data"))?;
        let modality = response.require_uint(result::MODALITY)?;
        u8::try_from(modality)
            .map_err(|_| Error::bad_response(format!("Modality {} out of range", modality)))
    }

    pub fn modality(&self) -> u8 {
        self.modality
    }

    pub(crate) fn session(&mut self) -> &mut Ctap2Session {
        self.session
    }
}
