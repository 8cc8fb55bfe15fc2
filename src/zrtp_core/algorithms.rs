use crate::srtp::{SrtpCipher, constants::{AUTH_TAG_LEN_32, AUTH_TAG_LEN_80}};

/// A negotiable ZRTP algorithm identified on the wire by a 4-byte tag.
pub trait Algorithm: Copy + Eq + Sized + 'static {
    const ALL: &'static [Self];

    fn tag(self) -> &'static [u8; 4];

    fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.tag().as_slice() == tag)
    }

    /// Accepts the tag with or without its trailing padding (`"B32"`).
    fn from_name(name: &str) -> Option<Self> {
        let mut padded = [b' '; 4];
        let bytes = name.trim().as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return None;
        }
        padded[..bytes.len()].copy_from_slice(bytes);
        Self::from_tag(&padded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    S256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes1,
    Aes3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTagAlgorithm {
    Hs32,
    Hs80,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAgreement {
    X255,
    /// Multi-stream mode: no DH, keys come from the master stream.
    Mult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SasAlgorithm {
    B32,
}

impl Algorithm for HashAlgorithm {
    const ALL: &'static [Self] = &[HashAlgorithm::S256];

    fn tag(self) -> &'static [u8; 4] {
        match self {
            HashAlgorithm::S256 => b"S256",
        }
    }
}

impl Algorithm for CipherAlgorithm {
    const ALL: &'static [Self] = &[CipherAlgorithm::Aes3, CipherAlgorithm::Aes1];

    fn tag(self) -> &'static [u8; 4] {
        match self {
            CipherAlgorithm::Aes1 => b"AES1",
            CipherAlgorithm::Aes3 => b"AES3",
        }
    }
}

impl Algorithm for AuthTagAlgorithm {
    const ALL: &'static [Self] = &[AuthTagAlgorithm::Hs80, AuthTagAlgorithm::Hs32];

    fn tag(self) -> &'static [u8; 4] {
        match self {
            AuthTagAlgorithm::Hs32 => b"HS32",
            AuthTagAlgorithm::Hs80 => b"HS80",
        }
    }
}

impl Algorithm for KeyAgreement {
    const ALL: &'static [Self] = &[KeyAgreement::X255, KeyAgreement::Mult];

    fn tag(self) -> &'static [u8; 4] {
        match self {
            KeyAgreement::X255 => b"X255",
            KeyAgreement::Mult => b"Mult",
        }
    }
}

impl Algorithm for SasAlgorithm {
    const ALL: &'static [Self] = &[SasAlgorithm::B32];

    fn tag(self) -> &'static [u8; 4] {
        match self {
            SasAlgorithm::B32 => b"B32 ",
        }
    }
}

impl CipherAlgorithm {
    #[must_use]
    pub fn key_len(self) -> usize {
        match self {
            CipherAlgorithm::Aes1 => 16,
            CipherAlgorithm::Aes3 => 32,
        }
    }

    #[must_use]
    pub fn srtp_cipher(self) -> SrtpCipher {
        match self {
            CipherAlgorithm::Aes1 => SrtpCipher::AesCm128,
            CipherAlgorithm::Aes3 => SrtpCipher::AesCm256,
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            CipherAlgorithm::Aes1 => "AES-CM-128",
            CipherAlgorithm::Aes3 => "AES-CM-256",
        }
    }
}

impl AuthTagAlgorithm {
    #[must_use]
    pub fn tag_len(self) -> usize {
        match self {
            AuthTagAlgorithm::Hs32 => AUTH_TAG_LEN_32,
            AuthTagAlgorithm::Hs80 => AUTH_TAG_LEN_80,
        }
    }
}

/// First entry of `ours` that the peer also offers.
pub fn choose<A: Algorithm>(ours: &[A], theirs: &[A]) -> Option<A> {
    ours.iter().copied().find(|a| theirs.contains(a))
}

/// Algorithm lists advertised in a Hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmSet {
    pub hashes: Vec<HashAlgorithm>,
    pub ciphers: Vec<CipherAlgorithm>,
    pub auth_tags: Vec<AuthTagAlgorithm>,
    pub key_agreements: Vec<KeyAgreement>,
    pub sas_types: Vec<SasAlgorithm>,
}

/// The algorithms agreed for one session, as carried in a Commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub auth_tag: AuthTagAlgorithm,
    pub key_agreement: KeyAgreement,
    pub sas: SasAlgorithm,
}

impl Negotiated {
    /// Picks the algorithms to commit to. Mandatory algorithms are implied
    /// even when the peer's Hello omits them.
    #[must_use]
    pub fn choose(ours: &AlgorithmSet, theirs: &AlgorithmSet, multi_stream: bool) -> Self {
        let key_agreement = if multi_stream && theirs.key_agreements.contains(&KeyAgreement::Mult) {
            KeyAgreement::Mult
        } else {
            let dh_ours: Vec<_> = ours
                .key_agreements
                .iter()
                .copied()
                .filter(|k| *k != KeyAgreement::Mult)
                .collect();
            choose(&dh_ours, &theirs.key_agreements).unwrap_or(KeyAgreement::X255)
        };
        Self {
            hash: choose(&ours.hashes, &theirs.hashes).unwrap_or(HashAlgorithm::S256),
            cipher: choose(&ours.ciphers, &theirs.ciphers).unwrap_or(CipherAlgorithm::Aes1),
            auth_tag: choose(&ours.auth_tags, &theirs.auth_tags).unwrap_or(AuthTagAlgorithm::Hs32),
            key_agreement,
            sas: choose(&ours.sas_types, &theirs.sas_types).unwrap_or(SasAlgorithm::B32),
        }
    }

    /// Name reported through `srtp_secrets_on`, e.g. `AES-CM-256/HS80`.
    #[must_use]
    pub fn cipher_name(&self) -> String {
        let tag = String::from_utf8_lossy(self.auth_tag.tag()).into_owned();
        format!("{}/{}", self.cipher.display_name(), tag)
    }
}
