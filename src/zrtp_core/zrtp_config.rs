use std::time::Duration;

use crate::config::{Config, ConfigError};
use crate::zrtp_core::algorithms::{
    Algorithm, AlgorithmSet, AuthTagAlgorithm, CipherAlgorithm, HashAlgorithm, KeyAgreement,
    SasAlgorithm,
};

const SECTION: &str = "Zrtp";

/// Maximum client id length carried in a Hello.
pub const CLIENT_ID_LEN: usize = 16;

/// Cache expiry value meaning "keep retained secrets forever".
pub const CACHE_EXPIRY_FOREVER: u32 = 0xFFFF_FFFF;

/// Retransmission schedule of one ZRTP timer: start at `initial`, double
/// after every resend up to `cap`, give up after `max_retries` resends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Hello timer.
    pub const T1: RetryPolicy = RetryPolicy {
        initial: Duration::from_millis(50),
        cap: Duration::from_millis(200),
        max_retries: 20,
    };

    /// Commit, DHPart2, Confirm2, GoClear and Error timer.
    pub const T2: RetryPolicy = RetryPolicy {
        initial: Duration::from_millis(150),
        cap: Duration::from_millis(1200),
        max_retries: 10,
    };

    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.cap)
    }
}

/// Local ZRTP preferences: what we advertise in Hello and how we retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZrtpConfig {
    pub client_id: String,
    pub algorithms: AlgorithmSet,
    /// Whether we accept and may send GoClear.
    pub allow_clear: bool,
    /// Retained secret lifetime in seconds, sent in Confirm.
    pub cache_expiry: u32,
    pub t1: RetryPolicy,
    pub t2: RetryPolicy,
}

impl Default for ZrtpConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl ZrtpConfig {
    #[must_use]
    pub fn standard() -> Self {
        Self {
            client_id: "rustyzrtp".to_string(),
            algorithms: AlgorithmSet {
                hashes: vec![HashAlgorithm::S256],
                ciphers: vec![CipherAlgorithm::Aes3, CipherAlgorithm::Aes1],
                auth_tags: vec![AuthTagAlgorithm::Hs80, AuthTagAlgorithm::Hs32],
                key_agreements: vec![KeyAgreement::X255, KeyAgreement::Mult],
                sas_types: vec![SasAlgorithm::B32],
            },
            allow_clear: false,
            cache_expiry: CACHE_EXPIRY_FOREVER,
            t1: RetryPolicy::T1,
            t2: RetryPolicy::T2,
        }
    }

    /// Reads the `[Zrtp]` section; absent keys keep their standard values.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut out = Self::standard();

        if let Some(id) = config.get_non_empty(SECTION, "client_id") {
            out.set_client_id(id);
        }
        if let Some(v) = parse_list::<HashAlgorithm>(config, "hashes")? {
            out.algorithms.hashes = v;
        }
        if let Some(v) = parse_list::<CipherAlgorithm>(config, "ciphers")? {
            out.algorithms.ciphers = v;
        }
        if let Some(v) = parse_list::<AuthTagAlgorithm>(config, "auth_tags")? {
            out.algorithms.auth_tags = v;
        }
        if let Some(v) = parse_list::<KeyAgreement>(config, "key_agreements")? {
            out.algorithms.key_agreements = v;
        }
        if let Some(v) = parse_list::<SasAlgorithm>(config, "sas_types")? {
            out.algorithms.sas_types = v;
        }
        if let Some(b) = config.get_bool(SECTION, "allow_clear")? {
            out.allow_clear = b;
        }
        if let Some(secs) = config.get_u64(SECTION, "cache_expiry_secs")? {
            out.cache_expiry = u32::try_from(secs).unwrap_or(CACHE_EXPIRY_FOREVER);
        }
        out.t1 = read_policy(config, "t1", out.t1)?;
        out.t2 = read_policy(config, "t2", out.t2)?;
        Ok(out)
    }

    /// Truncates to the 16 characters a Hello can carry.
    pub fn set_client_id(&mut self, id: &str) {
        self.client_id = id.chars().take(CLIENT_ID_LEN).collect();
    }

    /// Client id as the space padded 16-byte Hello field.
    #[must_use]
    pub fn client_id_bytes(&self) -> [u8; CLIENT_ID_LEN] {
        let mut out = [b' '; CLIENT_ID_LEN];
        let bytes = self.client_id.as_bytes();
        let n = bytes.len().min(CLIENT_ID_LEN);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }
}

fn parse_list<A: Algorithm>(config: &Config, key: &str) -> Result<Option<Vec<A>>, ConfigError> {
    let Some(names) = config.get_list(SECTION, key) else {
        return Ok(None);
    };
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let alg = A::from_name(&name).ok_or_else(|| ConfigError::InvalidValue {
            section: SECTION.to_string(),
            key: key.to_string(),
            expected: "a known algorithm tag",
            value: name.clone(),
        })?;
        if !out.contains(&alg) {
            out.push(alg);
        }
    }
    Ok(Some(out))
}

fn read_policy(config: &Config, prefix: &str, base: RetryPolicy) -> Result<RetryPolicy, ConfigError> {
    let mut policy = base;
    if let Some(ms) = config.get_u64(SECTION, &format!("{prefix}_initial_ms"))? {
        policy.initial = Duration::from_millis(ms);
    }
    if let Some(ms) = config.get_u64(SECTION, &format!("{prefix}_cap_ms"))? {
        policy.cap = Duration::from_millis(ms);
    }
    if let Some(n) = config.get_u64(SECTION, &format!("{prefix}_retries"))? {
        policy.max_retries = u32::try_from(n).unwrap_or(u32::MAX);
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn retry_delays_double_up_to_cap() {
        let p = RetryPolicy::T1;
        let mut d = p.initial;
        let mut seen = vec![d];
        for _ in 0..4 {
            d = p.next_delay(d);
            seen.push(d);
        }
        let ms: Vec<u128> = seen.iter().map(Duration::as_millis).collect();
        assert_eq!(ms, vec![50, 100, 200, 200, 200]);
    }

    #[test]
    fn reads_zrtp_section() {
        let cfg = Config::parse(
            "[Zrtp]\n\
             client_id = a-very-long-client-identifier\n\
             ciphers = AES1\n\
             sas_types = B32\n\
             allow_clear = yes\n\
             t2_retries = 3\n",
        );
        let z = ZrtpConfig::from_config(&cfg).unwrap();
        assert_eq!(z.client_id, "a-very-long-clie");
        assert_eq!(z.algorithms.ciphers, vec![CipherAlgorithm::Aes1]);
        assert_eq!(z.algorithms.sas_types, vec![SasAlgorithm::B32]);
        assert!(z.allow_clear);
        assert_eq!(z.t2.max_retries, 3);
        assert_eq!(z.t1, RetryPolicy::T1);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let cfg = Config::parse("[Zrtp]\nciphers = AES1, TWOF\n");
        let err = ZrtpConfig::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn client_id_is_space_padded() {
        let z = ZrtpConfig::standard();
        assert_eq!(&z.client_id_bytes(), b"rustyzrtp       ");
    }
}
