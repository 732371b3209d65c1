use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DissectError {
    /// Not enough data for the protocol header
    #[error("{protocol}: truncated header ({available} bytes, {needed} needed)")]
    Truncated {
        protocol: &'static str,
        needed: usize,
        available: usize,
    },
    /// Header present, but with inconsistent values
    #[error("{protocol}: malformed data: {reason}")]
    Malformed {
        protocol: &'static str,
        reason: &'static str,
    },
    #[error("invalid dissector id {0}")]
    InvalidDissectorId(usize),
}

impl DissectError {
    pub(crate) fn check_len(
        protocol: &'static str,
        data: &[u8],
        needed: usize,
    ) -> Result<(), DissectError> {
        if data.len() < needed {
            return Err(DissectError::Truncated {
                protocol,
                needed,
                available: data.len(),
            });
        }
        Ok(())
    }
}
