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

//! Object-store client construction. Grounded on
//! `openobserve/src/infra/src/storage/remote.rs`'s `init_aws_config`:
//! build from the environment, then apply explicit overrides for whatever
//! the run configuration names.

use std::{sync::Arc, time::Duration};

use config::ObjectStoreConfig;
use object_store::{ObjectStore, aws::AmazonS3Builder};

use crate::errors::Result;

/// Builds the S3-compatible object store client the enumerator and reader
/// read from. `allow_http` is always true because on-prem / MinIO-style
/// endpoints (the common case for `endpoint` being set explicitly) are
/// frequently plain HTTP.
pub fn build_client(
    cfg: &ObjectStoreConfig,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Arc<dyn ObjectStore>> {
    let opts = object_store::ClientOptions::default()
        .with_connect_timeout(Duration::from_secs(connect_timeout_secs))
        .with_timeout(Duration::from_secs(read_timeout_secs))
        .with_allow_http(true);

    let mut builder = AmazonS3Builder::from_env()
        .with_client_options(opts)
        .with_bucket_name(&cfg.bucket)
        .with_virtual_hosted_style_request(false);

    if !cfg.endpoint.is_empty() {
        builder = builder.with_endpoint(&cfg.endpoint);
    }
    if !cfg.access_key.is_empty() {
        builder = builder.with_access_key_id(&cfg.access_key);
    }
    if !cfg.secret_key.is_empty() {
        builder = builder.with_secret_access_key(&cfg.secret_key);
    }

    let client = builder.build()?;
    tracing::info!(bucket = %cfg.bucket, endpoint = %cfg.endpoint, "object store client initialized");
    Ok(Arc::new(client))
}
