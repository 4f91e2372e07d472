//! Per-attempt TLS context
//!
//! A [`TlsContext`] is assembled fresh for every connection attempt from the
//! loaded [`TrustBundle`] and the cipher policy, and is never modified after
//! it is handed to the protocol engine.

use crate::error::TlsError;
use crate::observability::EventSink;
use crate::tls::cipher_policy::{
    build_cipher_policy, platform_cipher_suites, CipherDescriptor, TlsVersion,
    MIN_PROTOCOL_VERSION,
};
use crate::tls::credentials::{KeyFormat, TrustBundle};
use rustls::{ClientConfig, RootCertStore, SupportedCipherSuite, SupportedProtocolVersion};
use std::fmt;
use std::sync::Arc;

const PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS12, &rustls::version::TLS13];

/// Peer certificate verification mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerVerifyMode {
    /// The broker's chain must verify against the trusted roots
    VerifyPeer,
}

/// Where the trusted roots came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustSource {
    /// CA certificates loaded from the configured file
    Configured { certificates: usize },
    /// No CA file loaded; the bundled web PKI roots are trusted
    PlatformDefault,
}

#[derive(Clone)]
pub struct TlsContext {
    min_version: TlsVersion,
    verify_mode: PeerVerifyMode,
    ciphers: Vec<CipherDescriptor>,
    trust: TrustSource,
    identity: Option<KeyFormat>,
    client_config: Arc<ClientConfig>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("min_version", &self.min_version)
            .field("verify_mode", &self.verify_mode)
            .field("ciphers", &self.ciphers.len())
            .field("trust", &self.trust)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Build a context using the bundled provider's cipher suites
    pub fn build(bundle: TrustBundle, sink: &EventSink) -> Result<Self, TlsError> {
        Self::build_with_ciphers(bundle, &platform_cipher_suites(), sink)
    }

    pub fn build_with_ciphers(
        bundle: TrustBundle,
        platform: &[SupportedCipherSuite],
        sink: &EventSink,
    ) -> Result<Self, TlsError> {
        let _span = crate::tls_span!(
            ca_certificates = bundle.ca_certificates.len(),
            identity = bundle.has_identity()
        )
        .entered();

        let selection = build_cipher_policy(platform);
        sink.log(selection.summary());
        let ciphers = selection
            .ciphers
            .iter()
            .map(CipherDescriptor::describe)
            .collect();

        let mut provider = rustls::crypto::ring::default_provider();
        provider.cipher_suites = selection.ciphers;
        let provider = Arc::new(provider);

        let TrustBundle {
            ca_certificates,
            identity,
        } = bundle;

        let mut roots = RootCertStore::empty();
        let (added, _ignored) = roots.add_parsable_certificates(ca_certificates);
        let trust = if added == 0 {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            sink.log("No trusted CA configured, using the default root store");
            TrustSource::PlatformDefault
        } else {
            TrustSource::Configured {
                certificates: added,
            }
        };

        let base = || {
            ClientConfig::builder_with_provider(Arc::clone(&provider))
                .with_protocol_versions(PROTOCOL_VERSIONS)
                .map(|builder| builder.with_root_certificates(roots.clone()))
        };

        let (client_config, identity) = match identity {
            Some(identity) => {
                let format = identity.key_format;
                match base()?
                    .with_client_auth_cert(identity.certificate_chain, identity.private_key)
                {
                    Ok(config) => {
                        sink.log(format!("Client certificate configured ({format} key)"));
                        (config, Some(format))
                    }
                    Err(e) => {
                        sink.warn(format!(
                            "Client certificate rejected ({e}), connecting without client authentication"
                        ));
                        (base()?.with_no_client_auth(), None)
                    }
                }
            }
            None => (base()?.with_no_client_auth(), None),
        };

        Ok(Self {
            min_version: MIN_PROTOCOL_VERSION,
            verify_mode: PeerVerifyMode::VerifyPeer,
            ciphers,
            trust,
            identity,
            client_config: Arc::new(client_config),
        })
    }

    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    pub fn verify_mode(&self) -> PeerVerifyMode {
        self.verify_mode
    }

    /// Enabled cipher suites in preference order
    pub fn ciphers(&self) -> &[CipherDescriptor] {
        &self.ciphers
    }

    pub fn trust(&self) -> TrustSource {
        self.trust
    }

    /// Key format of the client identity, if one is presented
    pub fn identity(&self) -> Option<KeyFormat> {
        self.identity
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::credentials::ClientIdentity;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    fn generated_identity() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        (cert, key)
    }

    #[test]
    fn test_empty_bundle_uses_default_roots() {
        let sink = EventSink::default();
        let context = TlsContext::build(TrustBundle::default(), &sink).unwrap();

        assert_eq!(context.trust(), TrustSource::PlatformDefault);
        assert_eq!(context.min_version(), TlsVersion::Tls12);
        assert_eq!(context.verify_mode(), PeerVerifyMode::VerifyPeer);
        assert!(context.identity().is_none());
        assert!(!context.ciphers().is_empty());
    }

    #[test]
    fn test_configured_ca_and_identity() {
        let (cert, key) = generated_identity();
        let bundle = TrustBundle {
            ca_certificates: vec![cert.clone()],
            identity: Some(ClientIdentity {
                certificate_chain: vec![cert],
                private_key: key,
                key_format: KeyFormat::Ec,
            }),
        };
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        let context = TlsContext::build(bundle, &sink).unwrap();

        assert_eq!(context.trust(), TrustSource::Configured { certificates: 1 });
        assert_eq!(context.identity(), Some(KeyFormat::Ec));

        let first = rx.try_recv().unwrap();
        assert!(first
            .as_log()
            .unwrap()
            .message
            .starts_with("SSL Info: Using"));
    }

    #[test]
    fn test_unusable_identity_falls_back_to_no_client_auth() {
        let (cert, _) = generated_identity();
        let bundle = TrustBundle {
            ca_certificates: vec![],
            identity: Some(ClientIdentity {
                certificate_chain: vec![cert],
                private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![0x30, 0x00])),
                key_format: KeyFormat::Dsa,
            }),
        };
        let sink = EventSink::default();

        let context = TlsContext::build(bundle, &sink).unwrap();
        assert!(context.identity().is_none());
    }

    #[test]
    fn test_restricted_platform_list_is_respected() {
        let platform: Vec<_> = platform_cipher_suites().into_iter().take(1).collect();
        let sink = EventSink::default();
        let context =
            TlsContext::build_with_ciphers(TrustBundle::default(), &platform, &sink).unwrap();
        assert_eq!(context.ciphers().len(), 1);
    }
}
