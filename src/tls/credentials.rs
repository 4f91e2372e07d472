//! Certificate and key loading
//!
//! Reads the CA bundle and the optional client identity from PEM files. Every
//! step reports one log line through the [`EventSink`]; failures leave the
//! corresponding part of the [`TrustBundle`] empty and the connect proceeds
//! with whatever material did load.
//!
//! The private key algorithm is not declared anywhere, so the key file is
//! probed with an ordered list of [`KeyParser`]s (by default RSA, then EC,
//! then DSA) and the first parser that accepts it wins.

use crate::error::CredentialError;
use crate::observability::EventSink;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use rustls_pemfile::Item;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const RSA_ENCRYPTION_OID: &[u8] = &[
    0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01,
];
const EC_PUBLIC_KEY_OID: &[u8] = &[0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
const ED25519_OID: &[u8] = &[0x06, 0x03, 0x2B, 0x65, 0x70];
const DSA_OID: &[u8] = &[0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x38, 0x04, 0x01];

/// Only the AlgorithmIdentifier near the start of a PKCS#8 blob is inspected
const PKCS8_ALGORITHM_WINDOW: usize = 32;

/// Private key algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    Rsa,
    Ec,
    Dsa,
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyFormat::Rsa => "RSA",
            KeyFormat::Ec => "EC",
            KeyFormat::Dsa => "DSA",
        };
        f.write_str(name)
    }
}

/// One attempt in the key probing chain
pub trait KeyParser {
    fn format(&self) -> KeyFormat;

    /// Parse `pem` as this format, `None` if it is not one
    fn parse(&self, pem: &[u8]) -> Option<PrivateKeyDer<'static>>;
}

/// PEM key parser for a single algorithm family
///
/// Accepts the traditional block for the family (`RSA PRIVATE KEY`,
/// `EC PRIVATE KEY`) as well as a `PRIVATE KEY` (PKCS#8) block whose
/// algorithm identifier names the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PemKeyParser {
    format: KeyFormat,
}

impl PemKeyParser {
    pub fn new(format: KeyFormat) -> Self {
        Self { format }
    }
}

impl KeyParser for PemKeyParser {
    fn format(&self) -> KeyFormat {
        self.format
    }

    fn parse(&self, pem: &[u8]) -> Option<PrivateKeyDer<'static>> {
        let mut reader = BufReader::new(pem);
        for item in rustls_pemfile::read_all(&mut reader) {
            let Ok(item) = item else {
                return None;
            };
            let key = match (self.format, item) {
                (KeyFormat::Rsa, Item::Pkcs1Key(key)) => PrivateKeyDer::Pkcs1(key),
                (KeyFormat::Ec, Item::Sec1Key(key)) => PrivateKeyDer::Sec1(key),
                (format, Item::Pkcs8Key(key)) => {
                    if pkcs8_algorithm(key.secret_pkcs8_der()) != Some(format) {
                        continue;
                    }
                    PrivateKeyDer::Pkcs8(key)
                }
                _ => continue,
            };
            return Some(key);
        }
        None
    }
}

/// Identify the algorithm family of a PKCS#8 private key
pub fn pkcs8_algorithm(der: &[u8]) -> Option<KeyFormat> {
    let window = &der[..der.len().min(PKCS8_ALGORITHM_WINDOW)];
    let contains = |oid: &[u8]| window.windows(oid.len()).any(|w| w == oid);

    if contains(RSA_ENCRYPTION_OID) {
        Some(KeyFormat::Rsa)
    } else if contains(EC_PUBLIC_KEY_OID) || contains(ED25519_OID) {
        Some(KeyFormat::Ec)
    } else if contains(DSA_OID) {
        Some(KeyFormat::Dsa)
    } else {
        None
    }
}

/// Ordered list of key formats to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormatPolicy {
    order: Vec<KeyFormat>,
}

impl Default for KeyFormatPolicy {
    fn default() -> Self {
        Self::new(vec![KeyFormat::Rsa, KeyFormat::Ec, KeyFormat::Dsa])
    }
}

impl KeyFormatPolicy {
    pub fn new(order: Vec<KeyFormat>) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &[KeyFormat] {
        &self.order
    }

    pub fn parsers(&self) -> Vec<PemKeyParser> {
        self.order.iter().copied().map(PemKeyParser::new).collect()
    }

    fn describe(&self) -> String {
        self.order
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Run `parsers` in order, stopping at the first one that accepts the key
pub fn probe_private_key(
    pem: &[u8],
    parsers: &[&dyn KeyParser],
) -> Option<(KeyFormat, PrivateKeyDer<'static>)> {
    parsers
        .iter()
        .find_map(|parser| parser.parse(pem).map(|key| (parser.format(), key)))
}

/// Client certificate chain and its private key
#[derive(Debug)]
pub struct ClientIdentity {
    pub certificate_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
    pub key_format: KeyFormat,
}

/// Trust and identity material for one connection attempt
#[derive(Debug, Default)]
pub struct TrustBundle {
    pub ca_certificates: Vec<CertificateDer<'static>>,
    pub identity: Option<ClientIdentity>,
}

impl TrustBundle {
    pub fn is_empty(&self) -> bool {
        self.ca_certificates.is_empty() && self.identity.is_none()
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }
}

/// Load the trust bundle for one connection attempt
///
/// Never fails: each outcome is logged once and folded into the bundle.
pub fn load_credentials(
    ca_path: Option<&Path>,
    cert_path: Option<&Path>,
    key_path: Option<&Path>,
    policy: &KeyFormatPolicy,
    sink: &EventSink,
) -> TrustBundle {
    let mut bundle = TrustBundle::default();

    if let Some(path) = ca_path {
        match load_ca_certificates(path) {
            Ok(certs) => {
                sink.log(format!(
                    "CA certificate loaded successfully ({} certificate{})",
                    certs.len(),
                    if certs.len() == 1 { "" } else { "s" }
                ));
                bundle.ca_certificates = certs;
            }
            Err(e) => sink.warn(e.to_string()),
        }
    }

    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            bundle.identity = load_client_identity(cert_path, key_path, policy, sink);
        }
        (Some(_), None) => sink.warn(
            "Client certificate configured without a private key; client identity skipped",
        ),
        (None, Some(_)) => sink.warn(
            "Private key configured without a client certificate; client identity skipped",
        ),
        (None, None) => {}
    }

    bundle
}

fn load_client_identity(
    cert_path: &Path,
    key_path: &Path,
    policy: &KeyFormatPolicy,
    sink: &EventSink,
) -> Option<ClientIdentity> {
    let certificate_chain = match load_client_certificate(cert_path) {
        Ok(chain) => {
            sink.log("Client certificate loaded successfully");
            Some(chain)
        }
        Err(e) => {
            sink.warn(e.to_string());
            None
        }
    };

    let key = match load_private_key(key_path, policy) {
        Ok((format, key)) => {
            sink.log(format!("Private key loaded successfully ({format})"));
            Some((format, key))
        }
        Err(e) => {
            sink.warn(e.to_string());
            None
        }
    };

    let (certificate_chain, (key_format, private_key)) = (certificate_chain?, key?);
    Some(ClientIdentity {
        certificate_chain,
        private_key,
        key_format,
    })
}

fn read_file(
    path: &Path,
    on_error: impl FnOnce(PathBuf, std::io::Error) -> CredentialError,
) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|e| on_error(path.to_path_buf(), e))
}

fn pem_certificates(pem: &[u8]) -> Vec<CertificateDer<'static>> {
    let mut reader = BufReader::new(pem);
    let mut probe = RootCertStore::empty();
    rustls_pemfile::certs(&mut reader)
        .filter_map(Result::ok)
        .filter(|cert| probe.add(cert.clone()).is_ok())
        .collect()
}

/// Read every parseable certificate from a CA bundle
pub fn load_ca_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let pem = read_file(path, |path, source| CredentialError::CaUnreadable { path, source })?;
    let certs = pem_certificates(&pem);
    if certs.is_empty() {
        return Err(CredentialError::CaEmpty {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Read the client certificate chain, leaf first
pub fn load_client_certificate(
    path: &Path,
) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let pem = read_file(path, |path, source| CredentialError::ClientCertUnreadable {
        path,
        source,
    })?;
    let chain = pem_certificates(&pem);
    if chain.is_empty() {
        return Err(CredentialError::ClientCertInvalid {
            path: path.to_path_buf(),
        });
    }
    Ok(chain)
}

/// Read a private key, probing formats in policy order
pub fn load_private_key(
    path: &Path,
    policy: &KeyFormatPolicy,
) -> Result<(KeyFormat, PrivateKeyDer<'static>), CredentialError> {
    let pem = read_file(path, |path, source| CredentialError::KeyUnreadable { path, source })?;
    let parsers = policy.parsers();
    let chain: Vec<&dyn KeyParser> = parsers.iter().map(|p| p as &dyn KeyParser).collect();

    probe_private_key(&pem, &chain).ok_or_else(|| CredentialError::KeyUnparseable {
        path: path.to_path_buf(),
        tried: policy.describe(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Notification;
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;
    use tempfile::NamedTempFile;

    struct RecordingParser<P> {
        inner: P,
        attempts: Rc<RefCell<Vec<KeyFormat>>>,
    }

    impl<P: KeyParser> KeyParser for RecordingParser<P> {
        fn format(&self) -> KeyFormat {
            self.inner.format()
        }

        fn parse(&self, pem: &[u8]) -> Option<PrivateKeyDer<'static>> {
            self.attempts.borrow_mut().push(self.inner.format());
            self.inner.parse(pem)
        }
    }

    struct FixedParser {
        format: KeyFormat,
        accepts: bool,
    }

    impl KeyParser for FixedParser {
        fn format(&self) -> KeyFormat {
            self.format
        }

        fn parse(&self, _pem: &[u8]) -> Option<PrivateKeyDer<'static>> {
            self.accepts
                .then(|| PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![0u8; 4])))
        }
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn log_messages(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            if let Some(event) = notification.as_log() {
                messages.push(event.message.clone());
            }
        }
        messages
    }

    fn ec_key_pem() -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }

    const RSA_PKCS1_PEM: &str = include_str!("../../tests/fixtures/rsa_pkcs1.key");
    const DSA_PKCS8_PEM: &str = include_str!("../../tests/fixtures/dsa_pkcs8.key");

    /// Run `pem` through the policy's parsers, returning the match and every format tried
    fn parse_recorded(pem: &str, policy: &KeyFormatPolicy) -> (Option<KeyFormat>, Vec<KeyFormat>) {
        let attempts = Rc::new(RefCell::new(Vec::new()));
        let parsers: Vec<RecordingParser<PemKeyParser>> = policy
            .parsers()
            .into_iter()
            .map(|inner| RecordingParser {
                inner,
                attempts: Rc::clone(&attempts),
            })
            .collect();
        let chain: Vec<&dyn KeyParser> = parsers.iter().map(|p| p as &dyn KeyParser).collect();

        let format = probe_private_key(pem.as_bytes(), &chain).map(|(format, _)| format);
        let tried = attempts.borrow().clone();
        (format, tried)
    }

    #[test]
    fn test_ec_key_probes_rsa_then_ec_and_stops() {
        let (_, key_pem) = ec_key_pem();
        let (format, tried) = parse_recorded(&key_pem, &KeyFormatPolicy::default());

        assert_eq!(format, Some(KeyFormat::Ec));
        assert_eq!(tried, vec![KeyFormat::Rsa, KeyFormat::Ec]);
    }

    #[test]
    fn test_rsa_pkcs1_key_accepted_by_first_parser() {
        let (format, tried) = parse_recorded(RSA_PKCS1_PEM, &KeyFormatPolicy::default());

        assert_eq!(format, Some(KeyFormat::Rsa));
        assert_eq!(tried, vec![KeyFormat::Rsa]);
    }

    #[test]
    fn test_dsa_pkcs8_key_reaches_third_parser() {
        let (format, tried) = parse_recorded(DSA_PKCS8_PEM, &KeyFormatPolicy::default());

        assert_eq!(format, Some(KeyFormat::Dsa));
        assert_eq!(tried, vec![KeyFormat::Rsa, KeyFormat::Ec, KeyFormat::Dsa]);
    }

    #[test]
    fn test_rsa_key_rejected_when_policy_excludes_rsa() {
        let policy = KeyFormatPolicy::new(vec![KeyFormat::Ec, KeyFormat::Dsa]);
        let (format, tried) = parse_recorded(RSA_PKCS1_PEM, &policy);

        assert_eq!(format, None);
        assert_eq!(tried, vec![KeyFormat::Ec, KeyFormat::Dsa]);
    }

    #[test]
    fn test_load_private_key_from_fixture_files() {
        let rsa = write_temp(RSA_PKCS1_PEM);
        let (format, key) = load_private_key(rsa.path(), &KeyFormatPolicy::default()).unwrap();
        assert_eq!(format, KeyFormat::Rsa);
        assert!(matches!(key, PrivateKeyDer::Pkcs1(_)));

        let dsa = write_temp(DSA_PKCS8_PEM);
        let (format, key) = load_private_key(dsa.path(), &KeyFormatPolicy::default()).unwrap();
        assert_eq!(format, KeyFormat::Dsa);
        assert!(matches!(key, PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn test_probe_short_circuits_on_first_success() {
        let first = FixedParser {
            format: KeyFormat::Dsa,
            accepts: true,
        };
        let second = FixedParser {
            format: KeyFormat::Rsa,
            accepts: true,
        };
        let chain: Vec<&dyn KeyParser> = vec![&first, &second];
        let (format, _) = probe_private_key(b"ignored", &chain).unwrap();
        assert_eq!(format, KeyFormat::Dsa);
    }

    #[test]
    fn test_probe_exhausts_chain_without_match() {
        let rejects = FixedParser {
            format: KeyFormat::Rsa,
            accepts: false,
        };
        let chain: Vec<&dyn KeyParser> = vec![&rejects];
        assert!(probe_private_key(b"ignored", &chain).is_none());
        assert!(probe_private_key(b"ignored", &[]).is_none());
    }

    #[test]
    fn test_pkcs8_algorithm_detection() {
        let mut rsa = vec![0x30, 0x82, 0x04, 0xBE, 0x02, 0x01, 0x00, 0x30, 0x0D];
        rsa.extend_from_slice(RSA_ENCRYPTION_OID);
        assert_eq!(pkcs8_algorithm(&rsa), Some(KeyFormat::Rsa));

        let mut dsa = vec![0x30, 0x82, 0x01, 0x4B, 0x02, 0x01, 0x00, 0x30, 0x82];
        dsa.extend_from_slice(DSA_OID);
        assert_eq!(pkcs8_algorithm(&dsa), Some(KeyFormat::Dsa));

        let ed25519 = [0x30, 0x2E, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2B, 0x65, 0x70];
        assert_eq!(pkcs8_algorithm(&ed25519), Some(KeyFormat::Ec));

        assert_eq!(pkcs8_algorithm(&[0x30, 0x00]), None);
    }

    #[test]
    fn test_policy_order_is_configurable() {
        let policy = KeyFormatPolicy::new(vec![KeyFormat::Ec]);
        assert_eq!(policy.order(), &[KeyFormat::Ec]);
        assert_eq!(policy.describe(), "EC");
        assert_eq!(KeyFormatPolicy::default().describe(), "RSA, EC, DSA");
    }

    #[test]
    fn test_missing_ca_file_is_one_log_event_and_empty_bundle() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        let bundle = load_credentials(
            Some(Path::new("/nonexistent/mqttls/ca.pem")),
            None,
            None,
            &KeyFormatPolicy::default(),
            &sink,
        );

        assert!(bundle.is_empty());
        let messages = log_messages(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Could not open CA certificate file"));
    }

    #[test]
    fn test_ca_file_without_certificates() {
        let file = write_temp("this is not a certificate\n");
        let result = load_ca_certificates(file.path());
        assert!(matches!(result, Err(CredentialError::CaEmpty { .. })));
    }

    #[test]
    fn test_full_identity_loads_from_generated_files() {
        let (cert_pem, key_pem) = ec_key_pem();
        let ca = write_temp(&cert_pem);
        let cert = write_temp(&cert_pem);
        let key = write_temp(&key_pem);
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        let bundle = load_credentials(
            Some(ca.path()),
            Some(cert.path()),
            Some(key.path()),
            &KeyFormatPolicy::default(),
            &sink,
        );

        assert_eq!(bundle.ca_certificates.len(), 1);
        let identity = bundle.identity.as_ref().unwrap();
        assert_eq!(identity.key_format, KeyFormat::Ec);
        assert_eq!(identity.certificate_chain.len(), 1);

        let messages = log_messages(&mut rx);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].starts_with("CA certificate loaded successfully"));
        assert_eq!(messages[1], "Client certificate loaded successfully");
        assert_eq!(messages[2], "Private key loaded successfully (EC)");
    }

    #[test]
    fn test_partial_identity_is_skipped_with_warning() {
        let (cert_pem, _) = ec_key_pem();
        let cert = write_temp(&cert_pem);
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        let bundle = load_credentials(
            None,
            Some(cert.path()),
            None,
            &KeyFormatPolicy::default(),
            &sink,
        );

        assert!(!bundle.has_identity());
        let messages = log_messages(&mut rx);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("client identity skipped"));
    }

    #[test]
    fn test_key_outside_policy_is_rejected() {
        let (cert_pem, key_pem) = ec_key_pem();
        let cert = write_temp(&cert_pem);
        let key = write_temp(&key_pem);
        let sink = EventSink::default();
        let mut rx = sink.subscribe();

        let bundle = load_credentials(
            None,
            Some(cert.path()),
            Some(key.path()),
            &KeyFormatPolicy::new(vec![KeyFormat::Rsa, KeyFormat::Dsa]),
            &sink,
        );

        assert!(!bundle.has_identity());
        let messages = log_messages(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].starts_with("Failed to load private key from"));
        assert!(messages[1].contains("RSA, DSA"));
    }
}
