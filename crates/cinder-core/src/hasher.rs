use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::Error;

/// One-way, salted password hashing for note passwords.
pub trait PasswordHasher: Send + Sync {
    /// Hash `password` with a fresh random salt.
    fn hash(&self, password: &str) -> Result<String, Error>;

    /// Check `password` against a stored hash. Malformed or foreign hash
    /// strings are a plain `false`.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id cost parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Default)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(config: HasherConfig) -> Result<Self, Error> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| Error::Configuration(format!("invalid argon2 parameters: {}", e)))?;
        Ok(Self { params })
    }

    /// Stored costs may not exceed the configured costs or the library
    /// defaults, whichever is higher.
    fn within_ceiling(&self, stored: &Params) -> bool {
        stored.m_cost() <= self.params.m_cost().max(Params::DEFAULT_M_COST)
            && stored.t_cost() <= self.params.t_cost().max(Params::DEFAULT_T_COST)
            && stored.p_cost() <= self.params.p_cost().max(Params::DEFAULT_P_COST)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Internal(format!("failed to hash password: {}", e)))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        match Params::try_from(&parsed) {
            Ok(stored) if self.within_ceiling(&stored) => {}
            _ => return false,
        }
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
