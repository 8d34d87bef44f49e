use qgate_core::error::{QgateError, Result};

/// Marker separating a field prefix from the identity claim it is bound to.
pub const IDENTITY_MARKER: char = '@';

/// Claim a scoped field may be bound to.
pub const SUBJECT_CLAIM: &str = "sub";

/// A write target of the form `prefix@claim`.
///
/// The stored field is `prefix` followed by the caller's subject, so one
/// caller can never address another caller's scoped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedField<'a> {
    pub prefix: &'a str,
    pub claim: &'a str,
}

impl<'a> ScopedField<'a> {
    /// `None` if `field` carries no marker.
    pub fn parse(field: &'a str) -> Result<Option<Self>> {
        let Some((prefix, claim)) = field.split_once(IDENTITY_MARKER) else {
            return Ok(None);
        };
        let claim = if claim.is_empty() { SUBJECT_CLAIM } else { claim };
        if claim != SUBJECT_CLAIM {
            return Err(QgateError::BadRequest(format!(
                "unsupported identity claim in field: {claim}"
            )));
        }
        Ok(Some(Self { prefix, claim }))
    }

    /// Operation name consulted for a scoped write, e.g. `hset@sub`.
    pub fn operation(&self, verb: &str) -> String {
        format!("{verb}{IDENTITY_MARKER}{}", self.claim)
    }

    pub fn bind(&self, subject: &str) -> String {
        format!("{}{subject}", self.prefix)
    }
}
