//! The descriptor itself.

use crate::key::{DescriptorId, OnionServiceId, PermanentKey, SecretIdPart};
use crate::{Error, Result};

use derive_builder::Builder;
use std::time::SystemTime;

/// The version of the descriptor format modeled here.
pub const HS_DESC_VERSION: u8 = 2;

/// A verified v2 onion service descriptor.
///
/// Built once, with [`HsDescriptorBuilder`], by whatever fetched the
/// descriptor and checked its signature; there is no way to change one
/// afterwards.  Share it as an `Arc<HsDescriptor>`.
///
/// Expiry and replacement are the business of whoever holds the
/// descriptor; see [`DescriptorCache`](crate::DescriptorCache).
#[derive(Clone, Debug, Builder, Eq, PartialEq)]
#[builder(build_fn(error = "Error"))]
pub struct HsDescriptor {
    /// Identifier of this published version of the descriptor.
    #[builder(setter(into))]
    descriptor_id: DescriptorId,
    /// Time-period-dependent part of `descriptor_id`.
    #[builder(setter(into))]
    secret_id_part: SecretIdPart,
    /// The service's long-term key.
    permanent_key: PermanentKey,
    /// When the service published this descriptor.
    publication_time: SystemTime,
    /// Rendezvous protocol versions the service supports, in increasing order.
    #[builder(
        field(type = "Option<Vec<u16>>", build = "self.build_protocol_versions()?"),
        setter(custom)
    )]
    protocol_versions: Vec<u16>,
}

impl HsDescriptorBuilder {
    /// Set the protocol versions the service supports, in any order.
    ///
    /// Repeats are ignored.
    pub fn protocol_versions(&mut self, versions: impl Into<Vec<u16>>) -> &mut Self {
        self.protocol_versions = Some(versions.into());
        self
    }

    /// Return the protocol versions as an ordered set.
    fn build_protocol_versions(&self) -> Result<Vec<u16>> {
        let mut versions = self
            .protocol_versions
            .clone()
            .ok_or_else(|| Error::MissingField("protocol_versions".into()))?;
        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }
}

impl HsDescriptor {
    /// Return a new builder.
    pub fn builder() -> HsDescriptorBuilder {
        HsDescriptorBuilder::default()
    }

    /// Return the version of this descriptor's format.  Always 2.
    pub fn version(&self) -> u8 {
        HS_DESC_VERSION
    }

    /// Return the descriptor id.
    pub fn descriptor_id(&self) -> &DescriptorId {
        &self.descriptor_id
    }

    /// Return the secret-id part.
    pub fn secret_id_part(&self) -> &SecretIdPart {
        &self.secret_id_part
    }

    /// Return the service's permanent key.
    pub fn permanent_key(&self) -> &PermanentKey {
        &self.permanent_key
    }

    /// Return the identity of the service this descriptor describes.
    pub fn onion_id(&self) -> OnionServiceId {
        self.permanent_key.onion_id()
    }

    /// Return the time at which this descriptor was published.
    pub fn publication_time(&self) -> SystemTime {
        self.publication_time
    }

    /// Return the supported protocol versions, in increasing order.
    pub fn protocol_versions(&self) -> &[u16] {
        &self.protocol_versions
    }

    /// Return true if the service supports protocol version `v`.
    pub fn supports_protocol(&self, v: u16) -> bool {
        self.protocol_versions.binary_search(&v).is_ok()
    }
}
