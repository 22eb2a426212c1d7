//! Unlock methods accepted by the keystore.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// How the caller proves possession of the keystore secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Password typed by the user.
    Password,
    /// Printed recovery phrase.
    PaperKey,
    /// FIDO2 authenticator using the hmac-secret extension.
    Fido2HmacSecret,
}

impl AuthMethod {
    /// Stable name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::PaperKey => "paper_key",
            Self::Fido2HmacSecret => "fido2_hmac_secret",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(Self::Password),
            "paper_key" => Ok(Self::PaperKey),
            "fido2_hmac_secret" => Ok(Self::Fido2HmacSecret),
            other => Err(WireError::UnknownAuthMethod(other.to_string())),
        }
    }
}
