use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WireError};

/// Reserved separator between correlation id segments.
pub const SEPARATOR: char = '/';

/// Reject a participant or endpoint name containing [`SEPARATOR`].
pub fn validate(segment: &str) -> Result<&str> {
    if segment.contains(SEPARATOR) {
        return Err(WireError::SeparatorInSegment {
            segment: segment.to_string(),
        });
    }
    Ok(segment)
}

/// Join three segments, rejecting a participant or endpoint that contains
/// [`SEPARATOR`]. `action` is system-generated and is not checked.
pub fn encode(participant: &str, endpoint: &str, action: &str) -> Result<String> {
    validate(participant)?;
    validate(endpoint)?;
    Ok(format!("{participant}{SEPARATOR}{endpoint}{SEPARATOR}{action}"))
}

/// Composite message key: `participant/endpoint/action`.
///
/// `action` is a fresh token per outbound call, or a function id for
/// callback invocations and cleanup notices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    pub participant: String,
    pub endpoint: String,
    pub action: String,
}

impl CorrelationId {
    /// Build an id, validating the participant and endpoint segments.
    pub fn new(
        participant: impl Into<String>,
        endpoint: impl Into<String>,
        action: impl Into<String>,
    ) -> Result<Self> {
        let participant = participant.into();
        let endpoint = endpoint.into();
        validate(&participant)?;
        validate(&endpoint)?;
        Ok(Self {
            participant,
            endpoint,
            action: action.into(),
        })
    }

    /// Split an encoded id. Anything other than three segments is an error.
    pub fn decode(encoded: &str) -> Result<Self> {
        let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
        match parts.as_slice() {
            [participant, endpoint, action] => Ok(Self {
                participant: (*participant).to_string(),
                endpoint: (*endpoint).to_string(),
                action: (*action).to_string(),
            }),
            _ => Err(WireError::SegmentCount {
                id: encoded.to_string(),
                count: parts.len(),
            }),
        }
    }

    /// The encoded string form. Fails if a public field was set to a name
    /// containing the separator after construction.
    pub fn encode(&self) -> Result<String> {
        encode(&self.participant, &self.endpoint, &self.action)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.participant, self.endpoint, self.action
        )
    }
}

impl FromStr for CorrelationId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
