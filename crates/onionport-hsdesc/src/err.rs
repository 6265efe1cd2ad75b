//! Declare an error type for onionport_hsdesc

use thiserror::Error;

/// An error from building or using onion service descriptor data.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A descriptor was built without one of its required fields.
    #[error("Descriptor is missing its {0} field")]
    MissingField(String),

    /// The permanent key could not be decoded as a PKCS#1 RSA public key.
    #[error("Invalid permanent key: {0}")]
    BadPermanentKey(String),

    /// A string was not a valid v2 onion address.
    #[error("Invalid onion service address")]
    BadOnionAddress,
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        Error::MissingField(e.field_name().to_string())
    }
}
