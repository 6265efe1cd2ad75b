//! Refuse `.onion` destinations we have no descriptor for.

use crate::connect::{OpenError, StreamOpener, StreamTarget};

use async_trait::async_trait;
use onionport_hsdesc::{DescriptorLookup, OnionServiceId};
use safelog::sensitive;
use std::sync::Arc;
use tracing::debug;

/// A [`StreamOpener`] that checks onion service destinations against a
/// [`DescriptorLookup`] before passing them on.
///
/// Other destinations go straight to the inner opener.  For a `.onion`
/// hostname, we fail early (with a status the client can understand) if
/// the address is malformed, or if we know of no descriptor for it.
pub struct OnionServiceGate<L, O> {
    /// Where we look for descriptors.
    descriptors: Arc<L>,
    /// The opener that does the actual work.
    inner: O,
}

impl<L, O> OnionServiceGate<L, O> {
    /// Construct a new gate in front of `inner`.
    pub fn new(descriptors: Arc<L>, inner: O) -> Self {
        OnionServiceGate { descriptors, inner }
    }
}

impl<L: DescriptorLookup, O> OnionServiceGate<L, O> {
    /// Check whether we may open a stream to `target`.
    fn check(&self, target: &StreamTarget) -> Result<(), OpenError> {
        let Some(hostname) = target.hostname().filter(|_| target.is_onion()) else {
            return Ok(());
        };
        let id: OnionServiceId = hostname
            .parse()
            .map_err(|_| OpenError::BadOnionAddress)?;
        match self.descriptors.lookup(&id) {
            Some(desc) => {
                debug!(
                    "Have a v{} descriptor for {}",
                    desc.version(),
                    sensitive(id)
                );
                Ok(())
            }
            None => Err(OpenError::OnionServiceNotFound),
        }
    }
}

#[async_trait]
impl<L, O> StreamOpener for OnionServiceGate<L, O>
where
    L: DescriptorLookup,
    O: StreamOpener,
{
    type Stream = O::Stream;

    async fn open_exit_stream(&self, target: &StreamTarget) -> Result<Self::Stream, OpenError> {
        self.check(target)?;
        self.inner.open_exit_stream(target).await
    }
}

#[cfg(test)]
mod test {
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
    use crate::connect::TargetHost;
    use crate::testing::{Behavior, MockOpener};
    use hex_literal::hex;
    use onionport_hsdesc::{DescriptorCache, HsDescriptor, PermanentKey};

    /// A 1024-bit RSA public key, PKCS#1 DER.  Its onion address is
    /// `7dcrrrlvvzbcroib.onion`.
    const KEY: &[u8] = &hex!(
        "30818902818100bfccaabef644fff43039230697749b8849113daa43ba3798a444e2ca"
        "c78f8526a23956dc4cabf09d95c9d1f02dec15d45c3f3e840ce7cdb709c35e0ecd5322"
        "04071b4736fa8b42d78d6019df8802d196eed85af6b68a7d775d24f62df85819557e95"
        "c7f893c3903301e9e05e0d4919d6dc82d7ce392623188f4f4aefc7995d730203010001"
    );

    /// A [`MockOpener`] that always connects, wrapped in a gate whose cache
    /// knows about `KEY`'s service.
    fn gate() -> OnionServiceGate<DescriptorCache, Arc<MockOpener>> {
        let cache = DescriptorCache::new();
        let desc = HsDescriptor::builder()
            .descriptor_id([1; 20])
            .secret_id_part([2; 20])
            .permanent_key(PermanentKey::from_der(KEY).unwrap())
            .publication_time(humantime::parse_rfc3339("2024-06-01T12:00:00Z").unwrap())
            .protocol_versions(vec![2, 3])
            .build()
            .unwrap();
        assert!(cache.insert(Arc::new(desc)));
        OnionServiceGate::new(
            Arc::new(cache),
            MockOpener::new(Behavior::Connect(vec![])),
        )
    }

    fn host(h: &str) -> StreamTarget {
        StreamTarget::new(TargetHost::Hostname(h.into()), 80)
    }

    #[tokio::test]
    async fn known_service() {
        let g = gate();
        for h in ["7dcrrrlvvzbcroib.onion", "www.7dcrrrlvvzbcroib.onion"] {
            assert!(g.open_exit_stream(&host(h)).await.is_ok());
        }
        assert_eq!(g.inner.targets().len(), 2);
    }

    #[tokio::test]
    async fn unknown_service() {
        let g = gate();
        let e = g
            .open_exit_stream(&host("aaaaaaaaaaaaaaaa.onion"))
            .await
            .unwrap_err();
        assert!(matches!(e, OpenError::OnionServiceNotFound));
        assert!(g.inner.targets().is_empty());
    }

    #[tokio::test]
    async fn bad_address() {
        let g = gate();
        let e = g
            .open_exit_stream(&host("not-an-address.onion"))
            .await
            .unwrap_err();
        assert!(matches!(e, OpenError::BadOnionAddress));
        assert!(g.inner.targets().is_empty());
    }

    #[tokio::test]
    async fn other_destinations_pass() {
        let g = gate();
        assert!(g.open_exit_stream(&host("example.com")).await.is_ok());
        let ip = StreamTarget::new(TargetHost::Ip([127, 0, 0, 1].into()), 80);
        assert!(g.open_exit_stream(&ip).await.is_ok());
        assert_eq!(g.inner.targets().len(), 2);
    }
}
