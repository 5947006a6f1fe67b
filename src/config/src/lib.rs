// Copyright 2024 Zinc Labs Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Run configuration for the daily usage aggregator: environment-variable
//! loading, defaults, and the validated `RunConfig` the rest of the pipeline
//! consumes.

use std::env::VarError;

use thiserror::Error as ThisError;

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_TOLERANCE: f64 = 0.0001;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DATABASE_PORT: u16 = 5432;
pub const DEFAULT_DATABASE_SCHEMA: &str = "public";

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("ConfigInvalid# missing required environment variable {0}")]
    Missing(&'static str),
    #[error("ConfigInvalid# {0} must be a valid {1}: {2}")]
    Invalid(&'static str, &'static str, String),
    #[error("ConfigInvalid# {0}")]
    Contradictory(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Object-store connection parameters (§3 `RunConfig.object_store`).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// Relational-store connection parameters (§3 `RunConfig.database`).
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub password: String,
    pub schema: String,
}

/// Full run configuration,§3 `RunConfig` plus the CLI/timeout fields named
/// in SPEC_FULL.md's Ambient Stack section.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub use_streaming: bool,
    pub chunk_size: usize,
    pub parallel_chunks: bool,
    pub max_workers: usize,
    pub column_filtering: bool,
    pub use_categorical: bool,
    pub use_bulk_copy: bool,
    pub use_arrow_compute: bool,
    pub tolerance: f64,
    pub batch_size: usize,
    pub truncate: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub object_store: ObjectStoreConfig,
    pub database: DatabaseConfig,
    pub provider_uuid: String,
    pub year: String,
    pub month: String,
}

impl RunConfig {
    /// Loads a `.env` file if present (non-fatal), then reads every
    /// recognized environment variable, applying defaults and validating
    /// that required fields are present and flag combinations are sane.
    ///
    /// `force_truncate` is the `--truncate` CLI flag, which always wins over
    /// the environment.
    pub fn from_env(force_truncate: bool) -> Result<Self> {
        dotenvy::dotenv().ok();

        let provider_uuid = required("PROVIDER_UUID")?;
        // Year keeps its natural width (the object-store layout uses
        // `year=<YYYY>`, §6) — only month is forced to two digits here.
        // invariant 7's two-character *output* year is derived separately,
        // at format time, from whatever width the run was given (see
        // `format::two_char_suffix`).
        let year = validate_numeric("REPORT_YEAR", &required("REPORT_YEAR")?)?;
        let month = zero_pad2(&required("REPORT_MONTH")?, "REPORT_MONTH")?;

        let object_store = ObjectStoreConfig {
            endpoint: required("S3_ENDPOINT")?,
            access_key: required("S3_ACCESS_KEY")?,
            secret_key: required("S3_SECRET_KEY")?,
            bucket: required("S3_BUCKET")?,
        };

        let database = DatabaseConfig {
            host: required("DATABASE_HOST")?,
            port: optional_parsed("DATABASE_PORT", DEFAULT_DATABASE_PORT)?,
            db: required("DATABASE_NAME")?,
            user: required("DATABASE_USER")?,
            password: required("DATABASE_PASSWORD")?,
            schema: optional_string("DATABASE_SCHEMA", DEFAULT_DATABASE_SCHEMA),
        };

        let parallel_chunks = optional_parsed("PARALLEL_CHUNKS", true)?;
        let max_workers = optional_parsed("MAX_WORKERS", DEFAULT_MAX_WORKERS)?;
        if parallel_chunks && max_workers == 0 {
            return Err(Error::Contradictory(
                "parallel_chunks=true requires max_workers > 0".to_string(),
            ));
        }

        let chunk_size = optional_parsed("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        if chunk_size == 0 {
            return Err(Error::Contradictory("chunk_size must be > 0".to_string()));
        }

        Ok(RunConfig {
            use_streaming: optional_parsed("USE_STREAMING", true)?,
            chunk_size,
            parallel_chunks,
            max_workers,
            column_filtering: optional_parsed("COLUMN_FILTERING", true)?,
            use_categorical: optional_parsed("USE_CATEGORICAL", false)?,
            use_bulk_copy: optional_parsed("USE_BULK_COPY", true)?,
            use_arrow_compute: optional_parsed("USE_ARROW_COMPUTE", false)?,
            tolerance: optional_parsed("TOLERANCE", DEFAULT_TOLERANCE)?,
            batch_size: optional_parsed("BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            truncate: force_truncate || optional_parsed("TRUNCATE", false)?,
            connect_timeout_secs: optional_parsed(
                "CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            read_timeout_secs: optional_parsed("READ_TIMEOUT_SECS", DEFAULT_READ_TIMEOUT_SECS)?,
            object_store,
            database,
            provider_uuid,
            year,
            month,
        })
    }
}

fn required(key: &'static str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        Ok(_) | Err(VarError::NotPresent) => Err(Error::Missing(key)),
        Err(VarError::NotUnicode(_)) => Err(Error::Invalid(key, "UTF-8 string", "not UTF-8".into())),
    }
}

fn optional_string(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_parsed<T>(key: &'static str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e: T::Err| Error::Invalid(key, std::any::type_name::<T>(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Zero-pads a month string to two characters (§9 "Month zero-padding"
/// design note — `"1"` and `"01"` are different everywhere).
fn zero_pad2(raw: &str, field: &'static str) -> Result<String> {
    if raw.is_empty() || raw.len() > 2 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Invalid(field, "1-2 digit number", raw.to_string()));
    }
    Ok(format!("{:0>2}", raw))
}

/// Validates that `raw` is a non-empty run of ASCII digits, without forcing
/// a particular width — the year is used verbatim in the `year=<YYYY>`
/// object-store path segment (§6).
fn validate_numeric(field: &'static str, raw: &str) -> Result<String> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Invalid(field, "numeric string", raw.to_string()));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pad2_pads_single_digit() {
        assert_eq!(zero_pad2("1", "REPORT_MONTH").unwrap(), "01");
        assert_eq!(zero_pad2("01", "REPORT_MONTH").unwrap(), "01");
        assert_eq!(zero_pad2("12", "REPORT_MONTH").unwrap(), "12");
    }

    #[test]
    fn zero_pad2_rejects_bad_input() {
        assert!(zero_pad2("123", "REPORT_MONTH").is_err());
        assert!(zero_pad2("", "REPORT_MONTH").is_err());
        assert!(zero_pad2("ab", "REPORT_MONTH").is_err());
    }

    #[test]
    fn validate_numeric_accepts_a_four_digit_year() {
        assert_eq!(validate_numeric("REPORT_YEAR", "2025").unwrap(), "2025");
    }

    #[test]
    fn validate_numeric_rejects_non_digits() {
        assert!(validate_numeric("REPORT_YEAR", "").is_err());
        assert!(validate_numeric("REPORT_YEAR", "20x5").is_err());
    }
}
