// SPDX-License-Identifier: Apache-2.0

//! Builds the document stream the Schema Inference Engine consumes,
//! according to the connection string's `scanMethod`/`scanLimit` (§10.3).

use bson::{doc, Document};
use docrelay_core::error::{DriverError, DriverResult};
use futures::TryStreamExt;
use mongodb::Collection;

use crate::connection::ScanMethod;

/// Pulls up to `scan_limit` documents from `collection` using `scan_method`,
/// and hands them back ready for [`docrelay_schema::generate`].
#[tracing::instrument(skip(collection), fields(collection = collection.name(), method = ?scan_method, limit = scan_limit))]
pub async fn sample_documents(
    collection: &Collection<Document>,
    scan_method: ScanMethod,
    scan_limit: u64,
) -> DriverResult<Vec<Document>> {
    let limit = i64::try_from(scan_limit).unwrap_or(i64::MAX);
    let documents = match scan_method {
        ScanMethod::IdForward => {
            collection
                .find(doc! {})
                .sort(doc! { "_id": 1 })
                .limit(limit)
                .await
                .map_err(|e| DriverError::connection(e.to_string()))?
                .try_collect()
                .await
                .map_err(|e| DriverError::io(e.to_string()))?
        }
        ScanMethod::IdReverse => {
            collection
                .find(doc! {})
                .sort(doc! { "_id": -1 })
                .limit(limit)
                .await
                .map_err(|e| DriverError::connection(e.to_string()))?
                .try_collect()
                .await
                .map_err(|e| DriverError::io(e.to_string()))?
        }
        ScanMethod::All => collection
            .find(doc! {})
            .await
            .map_err(|e| DriverError::connection(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| DriverError::io(e.to_string()))?,
        ScanMethod::Random => {
            let pipeline = vec![doc! { "$sample": { "size": scan_limit as i64 } }];
            collection
                .aggregate(pipeline)
                .await
                .map_err(|e| DriverError::connection(e.to_string()))?
                .try_collect()
                .await
                .map_err(|e| DriverError::io(e.to_string()))?
        }
    };

    tracing::debug!(sampled = documents.len(), "sampled documents for schema inference");
    Ok(documents)
}
