//! Cipher suite selection
//!
//! Filters the platform's cipher suites down to the strong subset (at least
//! 128-bit keys, negotiated over TLS 1.2 or 1.3) while keeping platform order.
//! When nothing qualifies the full platform list is used instead, so the
//! handshake always has something to offer.

use rustls::{ProtocolVersion, SupportedCipherSuite};
use std::fmt;

/// Minimum symmetric key strength for a suite to count as strong
pub const MIN_CIPHER_STRENGTH_BITS: u16 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// Protocol floor for every connection
pub const MIN_PROTOCOL_VERSION: TlsVersion = TlsVersion::Tls12;

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        };
        f.write_str(name)
    }
}

/// What the policy needs to know about a cipher suite
pub trait CipherInfo {
    fn name(&self) -> String;
    fn strength_bits(&self) -> u16;
    /// `None` when the suite is not tied to a single known protocol version
    fn protocol(&self) -> Option<TlsVersion>;
}

pub fn is_strong<C: CipherInfo + ?Sized>(cipher: &C) -> bool {
    cipher.strength_bits() >= MIN_CIPHER_STRENGTH_BITS
        && matches!(
            cipher.protocol(),
            Some(TlsVersion::Tls12) | Some(TlsVersion::Tls13)
        )
}

/// Result of applying the policy to a platform cipher list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSelection<C> {
    pub ciphers: Vec<C>,
    pub strong_count: usize,
    pub total_count: usize,
}

impl<C> CipherSelection<C> {
    /// True when no strong suite existed and the full list was kept
    pub fn fell_back(&self) -> bool {
        self.strong_count == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "SSL Info: Using {} secure ciphers out of {} total",
            self.strong_count, self.total_count
        )
    }
}

pub fn build_cipher_policy<C: CipherInfo + Clone>(platform: &[C]) -> CipherSelection<C> {
    let strong: Vec<C> = platform.iter().filter(|c| is_strong(*c)).cloned().collect();
    let strong_count = strong.len();

    let ciphers = if strong.is_empty() {
        platform.to_vec()
    } else {
        strong
    };

    CipherSelection {
        ciphers,
        strong_count,
        total_count: platform.len(),
    }
}

/// Plain description of a cipher suite
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CipherDescriptor {
    pub name: String,
    pub strength_bits: u16,
    pub protocol: Option<TlsVersion>,
}

impl CipherDescriptor {
    pub fn new(name: impl Into<String>, strength_bits: u16, protocol: Option<TlsVersion>) -> Self {
        Self {
            name: name.into(),
            strength_bits,
            protocol,
        }
    }

    pub fn describe<C: CipherInfo + ?Sized>(cipher: &C) -> Self {
        Self::new(cipher.name(), cipher.strength_bits(), cipher.protocol())
    }
}

impl CipherInfo for CipherDescriptor {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn strength_bits(&self) -> u16 {
        self.strength_bits
    }

    fn protocol(&self) -> Option<TlsVersion> {
        self.protocol
    }
}

/// Symmetric key strength implied by an IANA cipher suite name
pub fn strength_from_suite_name(name: &str) -> u16 {
    let name = name.to_ascii_uppercase();
    if name.contains("AES_256") || name.contains("CHACHA20") {
        256
    } else if name.contains("AES_128") {
        128
    } else if name.contains("3DES") {
        112
    } else if name.contains("DES") || name.contains("RC4") {
        56
    } else {
        0
    }
}

impl CipherInfo for SupportedCipherSuite {
    fn name(&self) -> String {
        format!("{:?}", self.suite())
    }

    fn strength_bits(&self) -> u16 {
        strength_from_suite_name(&self.name())
    }

    fn protocol(&self) -> Option<TlsVersion> {
        match self.version().version {
            ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            ProtocolVersion::TLSv1_1 => Some(TlsVersion::Tls11),
            ProtocolVersion::TLSv1_0 => Some(TlsVersion::Tls10),
            _ => None,
        }
    }
}

/// Cipher suites offered by the bundled crypto provider, in preference order
pub fn platform_cipher_suites() -> Vec<SupportedCipherSuite> {
    rustls::crypto::ring::default_provider().cipher_suites
}
