use crate::config::FrameFormat;
use crate::session::{SessionId, UserId};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("expected {expected} samples, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("sample {index} is not a finite number")]
    NonFinite { index: usize },
    #[error("frame timestamp must not be empty")]
    EmptyTimestamp,
    #[error("undecodable message: {0}")]
    Undecodable(String),
}

/// Who a frame belongs to and when it was captured; travels alongside the
/// samples through analysis so results can be routed back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameContext {
    pub session: SessionId,
    pub user: Option<UserId>,
    pub timestamp: String,
}

/// One validated block of mono samples.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub context: FrameContext,
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// Validates a frame exactly as received from a client.
    pub fn from_wire(
        session: SessionId,
        user: Option<UserId>,
        timestamp: String,
        samples: Vec<f32>,
        format: &FrameFormat,
    ) -> Result<Self, FrameError> {
        if timestamp.trim().is_empty() {
            return Err(FrameError::EmptyTimestamp);
        }
        if samples.len() != format.frame_size {
            return Err(FrameError::WrongLength {
                expected: format.frame_size,
                actual: samples.len(),
            });
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(FrameError::NonFinite { index });
        }

        Ok(Self {
            context: FrameContext {
                session,
                user,
                timestamp,
            },
            sample_rate_hz: format.sample_rate_hz,
            samples,
        })
    }

    pub fn session(&self) -> &SessionId {
        &self.context.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::new("s1").expect("valid")
    }

    #[test]
    fn accepts_a_full_finite_frame() {
        let format = FrameFormat::default();
        let frame = AudioFrame::from_wire(
            session(),
            None,
            "2024-01-01T00:00:00Z".to_owned(),
            vec![0.0; format.frame_size],
            &format,
        )
        .expect("valid frame");

        assert_eq!(frame.sample_rate_hz, 44_100);
        assert_eq!(frame.session().as_str(), "s1");
    }

    #[test]
    fn rejects_short_frames() {
        let format = FrameFormat::default();
        let err = AudioFrame::from_wire(session(), None, "t".to_owned(), vec![0.0; 10], &format)
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::WrongLength {
                expected: 2048,
                actual: 10
            }
        );
    }

    #[test]
    fn rejects_non_finite_samples() {
        let format = FrameFormat::default();
        let mut samples = vec![0.0; format.frame_size];
        samples[2] = f32::NAN;
        let err = AudioFrame::from_wire(session(), None, "t".to_owned(), samples, &format)
        .unwrap_err();
        assert_eq!(err, FrameError::NonFinite { index: 2 });
    }

    #[test]
    fn rejects_missing_timestamp() {
        let format = FrameFormat::default();
        let err = AudioFrame::from_wire(
            session(),
            None,
            " ".to_owned(),
            vec![0.0; format.frame_size],
            &format,
        )
            .unwrap_err();
        assert_eq!(err, FrameError::EmptyTimestamp);
    }
}
