//! Transactional batch and bulk execution.

mod common;

use common::*;
use cosmos_encryption::store::{status, RequestOptions};
use cosmos_encryption::{
    BulkExecutionOptions, BulkOperation, CosmosClient, ErrorKind, ItemRequestOptions, PartitionKey,
    PatchOperation, TransactionalBatch,
};
use serde_json::json;

fn pk(value: &str) -> PartitionKey {
    PartitionKey::from(value)
}

// ============================================================================
// Transactional batch
// ============================================================================

#[tokio::test]
async fn batch_results_follow_operation_order() {
    let fx = setup().await;
    let (first, second) = (test_doc("1", "pk1"), test_doc("2", "pk1"));

    let mut batch = TransactionalBatch::new("pk1");
    batch
        .create_item(&first)
        .unwrap()
        .create_item(&second)
        .unwrap()
        .read_item("1")
        .patch_item(
            "2",
            vec![PatchOperation::Set {
                path: "/sensitiveString".to_string(),
                value: json!("patched in batch"),
            }],
        );
    let response = fx
        .container
        .execute_batch(batch, &ItemRequestOptions::default())
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.len(), 4);
    assert_eq!(response.results[0].status_code, status::CREATED);
    assert_eq!(response.get(2).unwrap().item_as::<TestDoc>().unwrap(), Some(first));
    let patched = response.get(3).unwrap().item_as::<TestDoc>().unwrap().unwrap();
    assert_eq!(patched.sensitive_string, "patched in batch");

    let raw = fx.raw("2", "pk1");
    assert!(raw["sensitiveString"].is_string());
    assert_ne!(raw["sensitiveString"], json!("patched in batch"));
}

#[tokio::test]
async fn failed_batch_commits_nothing() {
    let fx = setup().await;
    fx.container
        .create_item(&test_doc("1", "pk1"), &pk("pk1"), &ItemRequestOptions::default())
        .await
        .unwrap();

    let mut batch = TransactionalBatch::new("pk1");
    batch
        .create_item(&test_doc("3", "pk1"))
        .unwrap()
        .create_item(&test_doc("1", "pk1"))
        .unwrap()
        .delete_item("1");
    let response = fx
        .container
        .execute_batch(batch, &ItemRequestOptions::default())
        .await
        .unwrap();

    assert!(!response.is_success());
    assert_eq!(response.status_code, status::CONFLICT);
    let codes: Vec<u16> = response.results.iter().map(|r| r.status_code).collect();
    assert_eq!(
        codes,
        vec![status::FAILED_DEPENDENCY, status::CONFLICT, status::FAILED_DEPENDENCY]
    );
    assert!(fx
        .store
        .raw_item(DATABASE_ID, CONTAINER_ID, "3", &pk("pk1"))
        .is_none());
    assert!(fx
        .store
        .raw_item(DATABASE_ID, CONTAINER_ID, "1", &pk("pk1"))
        .is_some());
}

#[tokio::test]
async fn undecryptable_result_does_not_hide_committed_siblings() {
    let fx = setup().await;
    let plain = serde_json::to_value(test_doc("raw", "pk1")).unwrap();
    fx.store
        .create_item(
            DATABASE_ID,
            CONTAINER_ID,
            &pk("pk1"),
            plain.as_object().unwrap().clone(),
            &RequestOptions::default(),
        )
        .await
        .unwrap();

    let created = test_doc("9", "pk1");
    let mut batch = TransactionalBatch::new("pk1");
    batch.create_item(&created).unwrap().read_item("raw");
    let response = fx
        .container
        .execute_batch(batch, &ItemRequestOptions::default())
        .await
        .unwrap();

    assert!(response.is_success());
    let first = response.get(0).unwrap();
    assert!(first.error.is_none());
    assert_eq!(first.item_as::<TestDoc>().unwrap(), Some(created));

    let second = response.get(1).unwrap();
    assert_eq!(second.status_code, status::OK);
    assert!(second.item.is_none());
    assert_eq!(second.error.as_ref().unwrap().kind(), ErrorKind::Data);

    assert!(fx.raw("9", "pk1")["sensitiveString"].is_string());
}

#[tokio::test]
async fn batch_with_unencryptable_item_is_not_sent() {
    let fx = setup().await;
    let mut oversized = test_doc("1", "pk1");
    oversized.sensitive_string = "x".repeat(9000);

    let mut batch = TransactionalBatch::new("pk1");
    batch.create_item(&oversized).unwrap();
    let err = fx
        .container
        .execute_batch(batch, &ItemRequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
}

// ============================================================================
// Bulk
// ============================================================================

#[tokio::test]
async fn bulk_reports_each_operation_in_input_order() {
    let fx = setup().await;
    let options = ItemRequestOptions::default();
    for id in ["1", "x"] {
        fx.container
            .create_item(&test_doc(id, "pk1"), &pk("pk1"), &options)
            .await
            .unwrap();
    }

    let operations = vec![
        BulkOperation::create("pk1", &test_doc("2", "pk1")).unwrap(),
        BulkOperation::upsert("pk2", &test_doc("3", "pk2")).unwrap(),
        BulkOperation::create("pk1", &test_doc("1", "pk1")).unwrap(),
        BulkOperation::read("pk1", "x"),
        BulkOperation::read("pk1", "missing"),
        BulkOperation::delete("pk1", "x"),
    ];
    let results = fx
        .container
        .execute_bulk(
            operations,
            &BulkExecutionOptions {
                max_concurrency: 2,
                ..Default::default()
            },
        )
        .await;

    let indexes: Vec<usize> = results.iter().map(|r| r.index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
    assert!(results[0].result.is_ok());
    assert!(results[1].result.is_ok());
    assert_eq!(
        results[2].result.as_ref().unwrap_err().status_code(),
        Some(status::CONFLICT)
    );
    assert_eq!(
        results[4].result.as_ref().unwrap_err().status_code(),
        Some(status::NOT_FOUND)
    );

    // Reads and deletes may race; either outcome is a clean status.
    match &results[3].result {
        Ok(response) => {
            let item: TestDoc = serde_json::from_value(response.item.clone().unwrap()).unwrap();
            assert_eq!(item, test_doc("x", "pk1"));
        }
        Err(err) => assert_eq!(err.status_code(), Some(status::NOT_FOUND)),
    }

    assert!(fx.raw("2", "pk1")["sensitiveString"].is_string());
    assert!(fx
        .store
        .raw_item(DATABASE_ID, CONTAINER_ID, "3", &pk("pk2"))
        .is_some());
}

#[tokio::test]
async fn bulk_with_no_operations_is_empty() {
    let fx = setup().await;
    let results = fx
        .container
        .execute_bulk(Vec::new(), &BulkExecutionOptions::default())
        .await;
    assert!(results.is_empty());
}
