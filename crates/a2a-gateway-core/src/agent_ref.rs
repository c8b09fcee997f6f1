//! Namespace-qualified agent identity used as the routing key.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::GatewayError;

/// Agent reference: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentRef {
    pub namespace: String,
    pub name: String,
}

impl AgentRef {
    /// Build a reference from its two segments.
    ///
    /// # Errors
    /// Returns `BadRequest` if either segment is empty or contains characters
    /// outside ASCII alphanumerics, `-`, `_` and `.`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, GatewayError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_segment("namespace", &namespace)?;
        validate_segment("name", &name)?;
        Ok(Self { namespace, name })
    }
}

fn validate_segment(label: &str, segment: &str) -> Result<(), GatewayError> {
    if segment.is_empty() {
        return Err(GatewayError::BadRequest(format!("agent {label} is empty")));
    }
    if segment == "." || segment == ".." {
        return Err(GatewayError::BadRequest(format!("agent {label} {segment:?} is reserved")));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(GatewayError::BadRequest(format!(
            "agent {label} {segment:?} contains invalid character {c:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for AgentRef {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s
            .split_once('/')
            .ok_or_else(|| GatewayError::BadRequest(format!("agent reference {s:?} is not namespace/name")))?;
        Self::new(namespace, name)
    }
}
