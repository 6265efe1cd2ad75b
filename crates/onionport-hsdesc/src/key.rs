//! Identities and digests that appear in an onion service descriptor.

use crate::{Error, Result};

use data_encoding::BASE32_NOPAD;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// Length of a SHA-1 digest, in bytes.
const DIGEST_LEN: usize = 20;

/// Length of a v2 onion service identity, in bytes.
const ONION_ID_LEN: usize = 10;

/// Suffix that marks a hostname as an onion service.
const ONION_SUFFIX: &str = ".onion";

/// Declare a newtype around a SHA-1 digest.
macro_rules! digest_type {
    {
        $(#[$meta:meta])*
        $name:ident
    } => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; DIGEST_LEN]);

        impl From<[u8; DIGEST_LEN]> for $name {
            fn from(d: [u8; DIGEST_LEN]) -> Self {
                $name(d)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0[..]
            }
        }

        impl $name {
            /// Return the digest as an array of bytes.
            pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "${}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {{ {} }}", stringify!($name), self)
            }
        }
    }
}

digest_type! {
    /// The identifier of one published version of a descriptor.
    ///
    /// Computed from the service's permanent id and its [`SecretIdPart`];
    /// we only store it.
    DescriptorId
}

digest_type! {
    /// Digest of the time period and replica information that goes into a
    /// [`DescriptorId`].
    SecretIdPart
}

/// The identity of a v2 onion service: the first 80 bits of the SHA-1
/// digest of its permanent key.
///
/// Displayed as its `.onion` address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnionServiceId([u8; ONION_ID_LEN]);

impl OnionServiceId {
    /// Return the raw identity bytes.
    pub fn as_bytes(&self) -> &[u8; ONION_ID_LEN] {
        &self.0
    }

    /// Return the identity's base32 label, without the `.onion` suffix.
    pub fn label(&self) -> String {
        BASE32_NOPAD.encode(&self.0).to_ascii_lowercase()
    }

    /// Return true if `hostname` names an onion service.
    ///
    /// It does not need to be a valid one.
    pub fn is_onion_hostname(hostname: &str) -> bool {
        hostname
            .len()
            .checked_sub(ONION_SUFFIX.len())
            .and_then(|n| hostname.get(n..))
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(ONION_SUFFIX))
    }
}

impl From<[u8; ONION_ID_LEN]> for OnionServiceId {
    fn from(id: [u8; ONION_ID_LEN]) -> Self {
        OnionServiceId(id)
    }
}

impl FromStr for OnionServiceId {
    type Err = Error;

    /// Parse a hostname like `<id>.onion` or `www.<id>.onion`.
    ///
    /// Labels in front of the identity are allowed and ignored, since the
    /// service sees the whole hostname anyway.
    fn from_str(s: &str) -> Result<Self> {
        if !Self::is_onion_hostname(s) {
            return Err(Error::BadOnionAddress);
        }
        let without_suffix = &s[..s.len() - ONION_SUFFIX.len()];
        let label = without_suffix
            .rsplit('.')
            .next()
            .ok_or(Error::BadOnionAddress)?;
        if label.len() != 16 {
            return Err(Error::BadOnionAddress);
        }
        let bytes = BASE32_NOPAD
            .decode(label.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::BadOnionAddress)?;
        let id: [u8; ONION_ID_LEN] = bytes.try_into().map_err(|_| Error::BadOnionAddress)?;
        Ok(OnionServiceId(id))
    }
}

impl fmt::Display for OnionServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.label(), ONION_SUFFIX)
    }
}

impl fmt::Debug for OnionServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionServiceId({})", self)
    }
}

/// The long-term RSA public key of an onion service.
///
/// Kept both in its DER encoding, which its identity is computed over, and
/// decoded.
#[derive(Clone)]
pub struct PermanentKey {
    /// PKCS#1 DER encoding, exactly as it appeared in the descriptor.
    der: Vec<u8>,
    /// The decoded key.
    key: RsaPublicKey,
    /// The identity derived from `der`.
    id: OnionServiceId,
}

impl PermanentKey {
    /// Decode a PKCS#1 DER-encoded RSA public key.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let key = RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| Error::BadPermanentKey(e.to_string()))?;
        let digest = Sha1::digest(der);
        let mut id = [0_u8; ONION_ID_LEN];
        id.copy_from_slice(&digest[..ONION_ID_LEN]);
        Ok(PermanentKey {
            der: der.to_vec(),
            key,
            id: OnionServiceId(id),
        })
    }

    /// Return the DER encoding of this key.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Return the decoded RSA key.
    pub fn as_rsa(&self) -> &RsaPublicKey {
        &self.key
    }

    /// Return the size of the key's modulus, in bits.
    pub fn bits(&self) -> usize {
        self.key.size() * 8
    }

    /// Return the onion service identity this key anchors.
    pub fn onion_id(&self) -> OnionServiceId {
        self.id
    }
}

impl PartialEq for PermanentKey {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for PermanentKey {}

impl fmt::Debug for PermanentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermanentKey")
            .field("bits", &self.bits())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test {
    // @@ begin test lint list
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list
    use super::*;
    use hex_literal::hex;

    /// A 1024-bit RSA public key, PKCS#1 DER.
    pub(crate) const TEST_KEY: &[u8] = &hex!(
        "30818902818100bfccaabef644fff43039230697749b8849113daa43ba3798a444e2ca"
        "c78f8526a23956dc4cabf09d95c9d1f02dec15d45c3f3e840ce7cdb709c35e0ecd5322"
        "04071b4736fa8b42d78d6019df8802d196eed85af6b68a7d775d24f62df85819557e95"
        "c7f893c3903301e9e05e0d4919d6dc82d7ce392623188f4f4aefc7995d730203010001"
    );

    #[test]
    fn permanent_key() {
        let k = PermanentKey::from_der(TEST_KEY).unwrap();
        assert_eq!(k.bits(), 1024);
        assert_eq!(k.as_der(), TEST_KEY);
        assert_eq!(k.onion_id().to_string(), "7dcrrrlvvzbcroib.onion");
        assert_eq!(k.onion_id().as_bytes(), &hex!("f8c518c575ae4228b901"));
        assert_eq!(k, PermanentKey::from_der(TEST_KEY).unwrap());

        assert!(matches!(
            PermanentKey::from_der(&TEST_KEY[..100]),
            Err(Error::BadPermanentKey(_))
        ));
    }

    #[test]
    fn parse_onion() {
        let id: OnionServiceId = "7dcrrrlvvzbcroib.onion".parse().unwrap();
        assert_eq!(id.as_bytes(), &hex!("f8c518c575ae4228b901"));
        let sub: OnionServiceId = "www.7DCRRRLVVZBCROIB.ONION".parse().unwrap();
        assert_eq!(id, sub);
        assert_eq!(id.label(), "7dcrrrlvvzbcroib");

        for bad in [
            "7dcrrrlvvzbcroib",
            "7dcrrrlvvzbcroi.onion",
            "7dcrrrlvvzbcroib1.onion",
            "7dcrrrlvvzbcro!b.onion",
            ".onion",
            "onion",
            "example.com",
        ] {
            assert_eq!(
                bad.parse::<OnionServiceId>(),
                Err(Error::BadOnionAddress),
                "{}",
                bad
            );
        }
        assert!(OnionServiceId::is_onion_hostname("anything.OnIoN"));
        assert!(!OnionServiceId::is_onion_hostname("onion"));
    }

    #[test]
    fn digests() {
        let d = DescriptorId::from([0xAB; 20]);
        assert_eq!(d.to_string(), format!("${}", "ab".repeat(20)));
        assert_eq!(d.as_ref(), &[0xAB; 20][..]);
        assert_eq!(
            format!("{:?}", SecretIdPart::from([0; 20])),
            format!("SecretIdPart {{ ${} }}", "00".repeat(20))
        );
    }
}
