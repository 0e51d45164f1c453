//! Transaction phases.

use std::fmt;

/// The five evaluation phases, in the order a transaction passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Phase 1: request headers.
    RequestHeaders = 1,
    /// Phase 2: request body.
    RequestBody = 2,
    /// Phase 3: response headers.
    ResponseHeaders = 3,
    /// Phase 4: response body.
    ResponseBody = 4,
    /// Phase 5: logging. Always runs, even after an interruption.
    Logging = 5,
}

impl Phase {
    /// Phase number as used by the `phase` action.
    pub fn number(&self) -> u8 {
        *self as u8
    }

    /// Upper-case phase name.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::RequestHeaders => "REQUEST_HEADERS",
            Phase::RequestBody => "REQUEST_BODY",
            Phase::ResponseHeaders => "RESPONSE_HEADERS",
            Phase::ResponseBody => "RESPONSE_BODY",
            Phase::Logging => "LOGGING",
        }
    }

    /// Phase for a number in `1..=5`.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Phase::RequestHeaders),
            2 => Some(Phase::RequestBody),
            3 => Some(Phase::ResponseHeaders),
            4 => Some(Phase::ResponseBody),
            5 => Some(Phase::Logging),
            _ => None,
        }
    }

    /// Every phase in order.
    pub fn all() -> &'static [Phase] {
        &[
            Phase::RequestHeaders,
            Phase::RequestBody,
            Phase::ResponseHeaders,
            Phase::ResponseBody,
            Phase::Logging,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_roundtrip_numbers() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_number(phase.number()), Some(*phase));
        }
        assert_eq!(Phase::from_number(0), None);
        assert_eq!(Phase::from_number(6), None);
    }

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::RequestHeaders < Phase::RequestBody);
        assert!(Phase::ResponseBody < Phase::Logging);
        assert_eq!(Phase::Logging.to_string(), "5 (LOGGING)");
    }
}
