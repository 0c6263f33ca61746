//! Session identifier generation.
//!
//! Ids are random bytes run through a message digest and hex-encoded in
//! upper case. Digest instances are borrowed from a bounded [`DigestPool`]
//! so concurrent callers never share one, and the pool is an explicit
//! object that can be handed to several generators.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use crate::config::IdGeneratorConfig;
use crate::error::{Error, Result};

/// Random bytes fed to the digest per round.
const SEED_BYTES: usize = 16;

/// Produces candidate session ids. Uniqueness against live sessions is
/// checked by the manager, which calls `generate` again on a collision.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Produce a new candidate id.
    fn generate(&self) -> Result<String>;

    /// Drop any cached randomness so the next call reseeds.
    fn reset(&self) {}
}

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Parse a name such as `SHA-256`, `sha256` or `SHA512`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SHA224" => Some(Self::Sha224),
            "SHA256" => Some(Self::Sha256),
            "SHA384" => Some(Self::Sha384),
            "SHA512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "SHA-224",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            Self::Sha224 => Hasher::Sha224(Sha224::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A digest instance of any supported algorithm.
pub enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    /// Hash `bytes` and reset the instance for reuse.
    pub fn digest(&mut self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha224(h) => {
                h.update(bytes);
                h.finalize_reset().to_vec()
            }
            Self::Sha256(h) => {
                h.update(bytes);
                h.finalize_reset().to_vec()
            }
            Self::Sha384(h) => {
                h.update(bytes);
                h.finalize_reset().to_vec()
            }
            Self::Sha512(h) => {
                h.update(bytes);
                h.finalize_reset().to_vec()
            }
        }
    }
}

/// Bounded free list of digest instances for one algorithm.
pub struct DigestPool {
    algorithm: DigestAlgorithm,
    free: Mutex<Vec<Hasher>>,
    capacity: usize,
}

impl DigestPool {
    /// Create an empty pool that retains at most `capacity` idle instances.
    pub fn new(algorithm: DigestAlgorithm, capacity: usize) -> Self {
        Self {
            algorithm,
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Number of idle instances.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Take an instance, creating one when the list is empty.
    pub fn borrow(&self) -> Hasher {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| self.algorithm.hasher())
    }

    /// Return an instance. Dropped when the pool is full.
    pub fn give_back(&self, hasher: Hasher) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(hasher);
        }
    }

    /// Hash `bytes` with a borrowed instance.
    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        let mut hasher = self.borrow();
        let out = hasher.digest(bytes);
        self.give_back(hasher);
        out
    }
}

impl fmt::Debug for DigestPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestPool")
            .field("algorithm", &self.algorithm)
            .field("idle", &self.idle())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Where random bytes come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntropySource {
    /// The operating system generator, falling back to a seeded PRNG.
    #[default]
    Os,
    /// A PRNG seeded once (from the OS, or from a fixed seed).
    Seeded,
}

/// Lazily seeded random source.
#[derive(Debug)]
struct RandomPool {
    source: EntropySource,
    seed: Option<u64>,
    rng: Mutex<Option<StdRng>>,
}

impl RandomPool {
    fn new(source: EntropySource, seed: Option<u64>) -> Self {
        Self {
            source,
            seed,
            rng: Mutex::new(None),
        }
    }

    fn fill(&self, buf: &mut [u8]) {
        if self.source == EntropySource::Os && self.seed.is_none() {
            match OsRng.try_fill_bytes(buf) {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "OS entropy unavailable, using seeded generator"),
            }
        }

        let mut rng = self.rng.lock();
        let rng = rng.get_or_insert_with(|| self.seed_rng());
        rng.fill_bytes(buf);
    }

    fn seed_rng(&self) -> StdRng {
        if let Some(seed) = self.seed {
            debug!(seed, "Seeding id generator from fixed seed");
            return StdRng::seed_from_u64(seed);
        }
        match StdRng::try_from_os_rng() {
            Ok(rng) => rng,
            Err(e) => {
                warn!(error = %e, "OS seed unavailable, seeding from the clock");
                let nanos = chrono::Utc::now()
                    .timestamp_nanos_opt()
                    .unwrap_or_default();
                StdRng::seed_from_u64(nanos as u64 ^ std::process::id() as u64)
            }
        }
    }

    fn reset(&self) {
        *self.rng.lock() = None;
    }
}

/// The standard generator: random bytes, digested, hex-encoded upper case,
/// with an optional `.route` suffix.
#[derive(Debug)]
pub struct SessionIdGenerator {
    length: usize,
    route: Option<String>,
    digests: Arc<DigestPool>,
    random: RandomPool,
}

impl SessionIdGenerator {
    /// Build a generator, resolving the digest algorithm.
    ///
    /// An unknown algorithm falls back to `fallback_algorithm`; if that is
    /// unknown too the generator cannot be built.
    pub fn new(config: &IdGeneratorConfig) -> Result<Self> {
        let algorithm = resolve_algorithm(config)?;
        let pool = Arc::new(DigestPool::new(algorithm, config.pool_size));
        Self::with_pool(config, pool)
    }

    /// Build a generator that borrows digests from a shared pool.
    pub fn with_pool(config: &IdGeneratorConfig, digests: Arc<DigestPool>) -> Result<Self> {
        if config.session_id_length == 0 {
            return Err(Error::Config("session id length must be positive".into()));
        }
        Ok(Self {
            length: config.session_id_length,
            route: config.route.clone().filter(|r| !r.is_empty()),
            digests,
            random: RandomPool::new(config.entropy, config.seed),
        })
    }

    /// Id length in bytes (the hex part is twice as long).
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.digests.algorithm()
    }
}

impl IdGenerator for SessionIdGenerator {
    fn generate(&self) -> Result<String> {
        let mut bytes = Vec::with_capacity(self.length);
        let mut seed = [0u8; SEED_BYTES];
        while bytes.len() < self.length {
            self.random.fill(&mut seed);
            let digest = self.digests.digest(&seed);
            let wanted = self.length - bytes.len();
            bytes.extend(digest.into_iter().take(wanted));
        }

        let mut id = hex::encode_upper(bytes);
        if let Some(route) = &self.route {
            id.push('.');
            id.push_str(route);
        }
        Ok(id)
    }

    fn reset(&self) {
        self.random.reset();
    }
}

fn resolve_algorithm(config: &IdGeneratorConfig) -> Result<DigestAlgorithm> {
    if let Some(algorithm) = DigestAlgorithm::from_name(&config.algorithm) {
        return Ok(algorithm);
    }
    warn!(
        algorithm = %config.algorithm,
        fallback = %config.fallback_algorithm,
        "Digest algorithm unavailable, using fallback"
    );
    DigestAlgorithm::from_name(&config.fallback_algorithm).ok_or_else(|| {
        Error::Config(format!(
            "no usable digest algorithm ({} or {})",
            config.algorithm, config.fallback_algorithm
        ))
    })
}
