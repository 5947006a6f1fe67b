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

//! Error taxonomy (§7). One variant per failure class named in the spec;
//! every other layer propagates with `?` and only the driver (`driver.rs`)
//! turns an `Error` into a process exit code.

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("ConfigInvalid# {0}")]
    ConfigInvalid(#[from] config::Error),

    #[error("ObjectStoreUnavailable# {0}")]
    ObjectStoreUnavailable(#[from] object_store::Error),

    #[error("FileReadError# {0}")]
    FileRead(String),

    #[error("SchemaMismatch# {0}")]
    SchemaMismatch(String),

    #[error("DatabaseUnavailable# {0}")]
    DatabaseUnavailable(#[from] sqlx::Error),

    #[error("AggregationError# {0}")]
    Aggregation(String),

    #[error("BulkLoadError# {0}")]
    BulkLoad(String),
}

impl Error {
    /// The §7 taxonomy name, used for the structured log line emitted right
    /// before the driver exits nonzero.
    pub fn taxonomy(&self) -> &'static str {
        match self {
            Error::ConfigInvalid(_) => "ConfigInvalid",
            Error::ObjectStoreUnavailable(_) => "ObjectStoreUnavailable",
            Error::FileRead(_) => "FileReadError",
            Error::SchemaMismatch(_) => "SchemaMismatch",
            Error::DatabaseUnavailable(_) => "DatabaseUnavailable",
            Error::Aggregation(_) => "AggregationError",
            Error::BulkLoad(_) => "BulkLoadError",
        }
    }
}

/// `infra`'s errors carry their own taxonomy (`ObjectStoreError`, `DbError`,
/// `IoError`, `ConfigError`) one layer down in `infra/src/errors.rs`; this
/// maps each onto the taxonomy name this crate's callers (and `main.rs`'s
/// exit-code logging) actually look for.
impl From<infra::errors::Error> for Error {
    fn from(e: infra::errors::Error) -> Self {
        match e {
            infra::errors::Error::ObjectStore(inner) => Error::ObjectStoreUnavailable(inner),
            infra::errors::Error::Sqlx(inner) => Error::DatabaseUnavailable(inner),
            infra::errors::Error::Io(inner) => Error::FileRead(inner.to_string()),
            infra::errors::Error::Config(inner) => Error::ConfigInvalid(inner),
        }
    }
}
