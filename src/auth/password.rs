use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
#[cfg(test)]
use argon2::{Algorithm, Params, Version};
use rand::rngs::OsRng;
use tracing::error;

/// One-way hashing of user-chosen passwords.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plain: &str) -> anyhow::Result<String>;
    /// `Ok(false)` on mismatch; `Err` only when `digest` is not a valid hash.
    fn verify(&self, plain: &str, digest: &str) -> anyhow::Result<bool>;
}

/// Argon2id producing PHC strings. Verification is constant-time.
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

#[cfg(test)]
impl Argon2Hasher {
    /// Minimal cost parameters so tests don't spend seconds hashing.
    pub fn fast() -> Self {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).expect("valid argon2 params");
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, plain: &str, digest: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(digest).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }
}
