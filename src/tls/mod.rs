//! TLS provisioning: credentials, cipher policy and the per-attempt context

pub mod cipher_policy;
pub mod context;
pub mod credentials;

pub use cipher_policy::{
    build_cipher_policy, platform_cipher_suites, CipherDescriptor, CipherInfo, CipherSelection,
    TlsVersion, MIN_CIPHER_STRENGTH_BITS, MIN_PROTOCOL_VERSION,
};
pub use context::{PeerVerifyMode, TlsContext, TrustSource};
pub use credentials::{
    load_credentials, probe_private_key, ClientIdentity, KeyFormat, KeyFormatPolicy, KeyParser,
    PemKeyParser, TrustBundle,
};
