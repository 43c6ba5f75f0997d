use ::common::config::StorageConfig;
use file_storage::{FileStorageError, ListFilter};
use uuid::Uuid;

use crate::common::TestStorage;

/// Store `count` small files in order and return their ids, oldest first.
async fn seed(storage: &TestStorage, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = Uuid::new_v4();
        storage
            .provider
            .store_bytes(id, &format!("file_{i}.txt"), i.to_string().as_bytes(), None)
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

#[tokio::test]
async fn pages_are_newest_first() {
    let storage = TestStorage::spawn().await;
    let ids = seed(&storage, 5).await;
    let newest_first: Vec<Uuid> = ids.iter().rev().copied().collect();

    let first = storage
        .provider
        .list(&ListFilter::new().page(0, 2))
        .await
        .unwrap();
    let second = storage
        .provider
        .list(&ListFilter::new().page(2, 2))
        .await
        .unwrap();
    let last = storage
        .provider
        .list(&ListFilter::new().page(4, 2))
        .await
        .unwrap();

    let listed: Vec<Uuid> = first
        .iter()
        .chain(&second)
        .chain(&last)
        .map(|record| record.document_id)
        .collect();
    assert_eq!(listed, newest_first);
    assert_eq!(last.len(), 1);
}

#[tokio::test]
async fn default_listing_returns_everything_up_to_limit() {
    let storage = TestStorage::spawn().await;
    seed(&storage, 3).await;

    let all = storage.provider.list(&ListFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn filters_combine_with_and() {
    let storage = TestStorage::spawn().await;
    let ids = seed(&storage, 4).await;

    let by_id = storage
        .provider
        .list(&ListFilter::new().document_ids([ids[0], ids[2]]))
        .await
        .unwrap();
    assert_eq!(by_id.len(), 2);

    let both = storage
        .provider
        .list(
            &ListFilter::new()
                .document_ids([ids[0], ids[2]])
                .file_names(["file_2.txt", "file_3.txt"]),
        )
        .await
        .unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].document_id, ids[2]);
    assert_eq!(both[0].file_name, "file_2.txt");
}

#[tokio::test]
async fn empty_filter_lists_are_ignored() {
    let storage = TestStorage::spawn().await;
    seed(&storage, 2).await;

    let records = storage
        .provider
        .list(
            &ListFilter::new()
                .document_ids(Vec::new())
                .file_names(Vec::<String>::new()),
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn empty_result_is_an_empty_page_by_default() {
    let storage = TestStorage::spawn().await;

    let empty = storage.provider.list(&ListFilter::new()).await.unwrap();
    assert!(empty.is_empty());

    seed(&storage, 1).await;
    let past_end = storage
        .provider
        .list(&ListFilter::new().page(10, 5))
        .await
        .unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn strict_listing_reports_empty_result_as_not_found() {
    let config = StorageConfig {
        strict_listing: true,
        ..Default::default()
    };
    let storage = TestStorage::spawn_with(config, 5).await;

    let err = storage
        .provider
        .list(&ListFilter::new().file_names(["missing.txt"]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, FileStorageError::NotFound(_)));
    assert_eq!(err.to_string(), "No files found with the given filters");

    seed(&storage, 1).await;
    assert_eq!(storage.provider.list(&ListFilter::new()).await.unwrap().len(), 1);
}
