//! Runtime configuration
//!
//! Both configs can be built directly or loaded from the environment
//! (a `.env` file is read if present).

use crate::cipher::KdfParams;
use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default number of headers per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Timeouts and paging for [`crate::MailboxFacade`].
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    /// Bound on TCP connect, TLS handshake, and LOGIN (each).
    pub connect_timeout: Duration,
    /// Bound on each protocol command after login.
    pub operation_timeout: Duration,
    pub page_size: u32,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
            page_size: DEFAULT_PAGE_SIZE,
            accept_invalid_certs: false,
        }
    }
}

impl FacadeConfig {
    /// Load from environment variables, all optional:
    /// - `MAIL_CONNECT_TIMEOUT_SECS` (default: `10`)
    /// - `MAIL_OPERATION_TIMEOUT_SECS` (default: `30`)
    /// - `MAIL_PAGE_SIZE` (default: `50`)
    /// - `MAIL_ACCEPT_INVALID_CERTS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed, or
    /// the page size is 0.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let page_size = var_or("MAIL_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(Error::Config("MAIL_PAGE_SIZE must be positive".into()));
        }

        Ok(Self {
            connect_timeout: Duration::from_secs(var_or(
                "MAIL_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            operation_timeout: Duration::from_secs(var_or(
                "MAIL_OPERATION_TIMEOUT_SECS",
                defaults.operation_timeout.as_secs(),
            )?),
            page_size,
            accept_invalid_certs: var_or("MAIL_ACCEPT_INVALID_CERTS", false)?,
        })
    }
}

/// Where and how the vault stores records.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub path: PathBuf,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mail-vault.json"),
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    /// Load from environment variables, all optional:
    /// - `MAIL_VAULT_PATH` (default: `mail-vault.json`)
    /// - `MAIL_VAULT_KDF_MEMORY_KIB`
    /// - `MAIL_VAULT_KDF_ITERATIONS`
    /// - `MAIL_VAULT_KDF_PARALLELISM`
    ///
    /// KDF values default to Argon2's recommended parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            path: env::var("MAIL_VAULT_PATH").map_or(defaults.path, PathBuf::from),
            kdf: KdfParams {
                memory_kib: var_or("MAIL_VAULT_KDF_MEMORY_KIB", defaults.kdf.memory_kib)?,
                iterations: var_or("MAIL_VAULT_KDF_ITERATIONS", defaults.kdf.iterations)?,
                parallelism: var_or("MAIL_VAULT_KDF_PARALLELISM", defaults.kdf.parallelism)?,
            },
        })
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
