use std::time::Duration;

use tracing::{debug, instrument};

use super::fingerprint::{CaptureError, CaptureStatus, FingerprintBioEnrollment, SampleStatus};
use crate::{ctap::state::CommandState, error::Result};

/// Where a fingerprint enrollment stands between two samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentState {
    /// No sample taken, the next capture begins a new template.
    NotStarted,
    Capturing { template_id: Vec<u8>, remaining: u64 },
    Complete { template_id: Vec<u8> },
    /// The last sample was rejected. `remaining` is what it was before that sample.
    Failed {
        template_id: Option<Vec<u8>>,
        remaining: Option<u64>,
        code: u8,
    },
}

impl Default for EnrollmentState {
    fn default() -> Self {
        EnrollmentState::NotStarted
    }
}

impl EnrollmentState {
    pub fn template_id(&self) -> Option<&[u8]> {
        match self {
            EnrollmentState::NotStarted => None,
            EnrollmentState::Capturing { template_id, .. }
            | EnrollmentState::Complete { template_id } => Some(template_id),
            EnrollmentState::Failed { template_id, .. } => template_id.as_deref(),
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        match self {
            EnrollmentState::NotStarted => None,
            EnrollmentState::Capturing { remaining, .. } => Some(*remaining),
            EnrollmentState::Complete { .. } => Some(0),
            EnrollmentState::Failed { remaining, .. } => *remaining,
        }
    }

    /// Applies the outcome of one capture of template `template_id`.
    ///
    /// A rejected sample keeps the previous sample count, whatever the authenticator
    /// reported alongside it.
    pub fn advance(&self, template_id: Vec<u8>, status: CaptureStatus) -> EnrollmentState {
        if status.sample_status != u8::from(SampleStatus::Good) {
            return EnrollmentState::Failed {
                template_id: Some(template_id),
                remaining: self.remaining(),
                code: status.sample_status,
            };
        }
        match status.remaining {
            0 => EnrollmentState::Complete { template_id },
            remaining => EnrollmentState::Capturing {
                template_id,
                remaining,
            },
        }
    }
}

/// Drives one enrollment sample by sample.
///
/// ```ignore
/// let mut context = bio.enroll(None);
/// let template_id = loop {
///     match context.capture(None).await {
///         Ok(Some(template_id)) => break template_id,
///         Ok(None) => println!("{:?} more samples", context.remaining()),
///         Err(Error::Capture(e)) => println!("Try again: {}", e),
///         Err(e) => return Err(e),
///     }
/// };
/// ```
pub struct EnrollmentContext<'b, 'a> {
    bio: &'b mut FingerprintBioEnrollment<'a>,
    timeout: Option<Duration>,
    state: EnrollmentState,
}

impl<'b, 'a> EnrollmentContext<'b, 'a> {
    pub(crate) fn new(bio: &'b mut FingerprintBioEnrollment<'a>, timeout: Option<Duration>) -> Self {
        EnrollmentContext {
            bio,
            timeout,
            state: EnrollmentState::NotStarted,
        }
    }

    pub fn state(&self) -> &EnrollmentState {
        &self.state
    }

    pub fn template_id(&self) -> Option<&[u8]> {
        self.state.template_id()
    }

    /// Samples still needed, unknown until the first capture.
    pub fn remaining(&self) -> Option<u64> {
        self.state.remaining()
    }

    /// Captures one sample, returning the template ID once the enrollment is complete.
    ///
    /// A rejected sample is returned as [CaptureError], after which capturing again
    /// retries the same step.
    #[instrument(skip_all)]
    pub async fn capture(&mut self, state: Option<&CommandState>) -> Result<Option<Vec<u8>>> {
        let (template_id, status) = match &self.state {
            EnrollmentState::Complete { template_id } => return Ok(Some(template_id.clone())),
            current => match current.template_id() {
                None => {
                    let begin = self.bio.enroll_begin(self.timeout, state).await?;
                    (begin.template_id, begin.status)
                }
                Some(template_id) => {
                    let template_id = template_id.to_vec();
                    let status = self
                        .bio
                        .enroll_capture_next(&template_id, self.timeout, state)
                        .await?;
                    (template_id, status)
                }
            },
        };

        self.state = self.state.advance(template_id, status);
        match &self.state {
            EnrollmentState::Complete { template_id } => {
                debug!("Enrollment complete");
                Ok(Some(template_id.clone()))
            }
            EnrollmentState::Failed { code, .. } => Err(CaptureError::new(*code).into()),
            _ => {
                debug!(remaining = ?self.remaining(), "Sample accepted");
                Ok(None)
            }
        }
    }

    /// Forgets the enrollment in progress and aborts any capture on the authenticator.
    pub async fn cancel(&mut self) -> Result<()> {
        self.state = EnrollmentState::NotStarted;
        self.bio.enroll_cancel().await
    }
}
