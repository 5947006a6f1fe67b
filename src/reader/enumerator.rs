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

//! Object-store file enumerator (§4.1, §6 "Object store layout").
//!
//! Paths look like
//! `<bucket>/data/<org>/OCP/source=<uuid>/year=<YYYY>/month=<MM>/<date>=<DD>/*pod_usage*.parquet`.
//! `<org>` is not part of `RunConfig` (only `provider_uuid`/`year`/`month`
//! are, per §3), so this enumerator lists everything under `data/` and
//! filters by the `source=`/`year=`/`month=` path segments plus the glob
//! fragment — equivalent to the spec's glob but tolerant of an unknown
//! `<org>` segment.

use futures::TryStreamExt;
use object_store::{ObjectStore, path::Path};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PodUsage,
    NodeLabels,
    NamespaceLabels,
}

impl FileKind {
    fn glob_fragment(self) -> &'static str {
        match self {
            FileKind::PodUsage => "pod_usage",
            FileKind::NodeLabels => "node_labels",
            FileKind::NamespaceLabels => "namespace_labels",
        }
    }
}

/// Lists the lexicographically ordered set of file paths for `kind` under
/// `(provider_uuid, year, month)`. Returns an empty set (not an error) if no
/// files exist; fails with `ObjectStoreUnavailable` if listing itself
/// cannot complete.
pub async fn list_files(
    store: &dyn ObjectStore,
    provider_uuid: &str,
    year: &str,
    month: &str,
    kind: FileKind,
) -> Result<Vec<String>> {
    let source_segment = format!("source={provider_uuid}");
    let year_segment = format!("year={year}");
    let month_segment = format!("month={month}");
    let fragment = kind.glob_fragment();

    let mut matches: Vec<String> = crate::retry::with_backoff("list files", || async {
        store
            .list(Some(&Path::from("data")))
            .map_err(Error::from)
            .try_filter_map(|meta| {
                let path = meta.location.to_string();
                let matched = path.contains(&source_segment)
                    && path.contains(&year_segment)
                    && path.contains(&month_segment)
                    && path.contains(fragment);
                futures::future::ready(Ok(matched.then_some(path)))
            })
            .try_collect()
            .await
    })
    .await?;

    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use object_store::memory::InMemory;

    async fn seed(store: &InMemory, path: &str) {
        store
            .put(&Path::from(path), Bytes::from_static(b"x").into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lists_matching_files_sorted() {
        let store = InMemory::new();
        seed(
            &store,
            "data/org1/OCP/source=prov-1/year=2025/month=10/date=02/pod_usage-2.parquet",
        )
        .await;
        seed(
            &store,
            "data/org1/OCP/source=prov-1/year=2025/month=10/date=01/pod_usage-1.parquet",
        )
        .await;
        seed(
            &store,
            "data/org1/OCP/source=prov-1/year=2025/month=10/date=01/node_labels.parquet",
        )
        .await;
        seed(
            &store,
            "data/org1/OCP/source=prov-2/year=2025/month=10/date=01/pod_usage.parquet",
        )
        .await;

        let files = list_files(&store, "prov-1", "2025", "10", FileKind::PodUsage)
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0] < files[1]);
        assert!(files.iter().all(|f| f.contains("prov-1")));
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let store = InMemory::new();
        let files = list_files(&store, "prov-x", "2025", "10", FileKind::PodUsage)
            .await
            .unwrap();
        assert!(files.is_empty());
    }
}
