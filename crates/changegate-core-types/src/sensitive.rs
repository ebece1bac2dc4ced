//! Redacting wrapper for connector credentials.
//!
//! Platform and VCS tokens pass through the orchestrator and are attached to
//! app records. `Sensitive<T>` keeps them out of logs, error messages and
//! serialized audit payloads.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const REDACTED: &str = "***REDACTED***";

/// Value that never prints or serializes its content
///
/// ```
/// use changegate_core_types::Sensitive;
///
/// let token = Sensitive::new("ghp_abc".to_string());
/// assert_eq!(format!("{token:?}"), "***REDACTED***");
/// assert_eq!(token.expose(), "ghp_abc");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the secret. Only connectors should call this.
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> Serialize for Sensitive<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Sensitive<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Sensitive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_redact() {
        let secret = Sensitive::new("api-key-12345");
        assert_eq!(format!("{:?}", secret), REDACTED);
        assert_eq!(format!("{}", secret), REDACTED);
    }

    #[test]
    fn test_serialize_redacts() {
        let secret = Sensitive::new("hunter2".to_string());
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"***REDACTED***\"");
    }

    #[test]
    fn test_deserialize_reads_plain_value() {
        let secret: Sensitive<String> = serde_json::from_str("\"token\"").unwrap();
        assert_eq!(secret.expose(), "token");
    }

    #[test]
    fn test_redacted_inside_struct_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Credentials {
            tenant: String,
            secret: Sensitive<String>,
        }

        let creds = Credentials {
            tenant: "contoso".to_string(),
            secret: Sensitive::new("s3cr3t".to_string()),
        };

        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("contoso"));
        assert!(!debug_str.contains("s3cr3t"));
    }
}
