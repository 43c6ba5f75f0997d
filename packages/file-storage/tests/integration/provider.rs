use std::time::Duration;

use ::common::config::StorageConfig;
use file_storage::{FileStorageError, FileStorageProvider, ListFilter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::common::{TestStorage, payload};

mod round_trip {
    use super::*;

    #[tokio::test]
    async fn stored_bytes_come_back_unchanged() {
        let storage = TestStorage::spawn().await;

        for len in [0, 1, 100, 8192, 8192 * 3 + 17] {
            let id = Uuid::new_v4();
            let data = payload(len);
            let record = storage
                .provider
                .store_bytes(id, "blob.bin", &data, Some("application/octet-stream"))
                .await
                .unwrap();
            assert_eq!(record.document_id, id);
            assert_eq!(record.file_size, len as u64);

            let mut file = storage.provider.retrieve(id).await.unwrap();
            assert_eq!(file.file_name, "blob.bin");
            assert_eq!(file.file_size, len as u64);

            let mut content = Vec::new();
            file.content.read_to_end(&mut content).await.unwrap();
            assert_eq!(content, data, "length {len}");
        }

        assert_eq!(storage.large_object_count().await, 5);
    }

    #[tokio::test]
    async fn streamed_store_and_retrieve_into() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();
        let data = payload(100_000);

        let (mut tx, rx) = tokio::io::duplex(4096);
        let writer = {
            let data = data.clone();
            tokio::spawn(async move {
                tx.write_all(&data).await.unwrap();
            })
        };
        let record = storage
            .provider
            .store(id, "stream.bin", Box::new(rx), None)
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(record.file_size, data.len() as u64);
        assert_eq!(record.file_type, None);

        let mut sink = Vec::new();
        let fetched = storage.provider.retrieve_into(id, &mut sink).await.unwrap();
        assert_eq!(fetched, record);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn records_live_in_the_project_schema() {
        let config = StorageConfig {
            project_name: "tenant_a".into(),
            ..Default::default()
        };
        let storage = TestStorage::spawn_with(config, 5).await;

        storage
            .provider
            .store_bytes(Uuid::new_v4(), "a.txt", b"hello", Some("text/plain"))
            .await
            .unwrap();

        assert_eq!(storage.row_count("tenant_a", "file_storage").await, 1);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();
        storage
            .provider
            .store_bytes(id, "keep.txt", b"kept", None)
            .await
            .unwrap();

        let second = FileStorageProvider::new(StorageConfig::default()).unwrap();
        second.initialize(storage.pool.clone()).await.unwrap();

        let file = second.retrieve(id).await.unwrap();
        assert_eq!(file.file_size, 4);
    }
}

mod replace {
    use super::*;

    #[tokio::test]
    async fn second_store_replaces_content_and_metadata() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();

        let first = storage
            .provider
            .store_bytes(id, "v1.txt", b"first version", Some("text/plain"))
            .await
            .unwrap();
        let second = storage
            .provider
            .store_bytes(id, "v2.md", b"second", Some("text/markdown"))
            .await
            .unwrap();

        assert_ne!(first.blob_ref, second.blob_ref);
        assert_eq!(second.file_name, "v2.md");
        assert_eq!(second.file_size, 6);
        assert_eq!(second.file_type.as_deref(), Some("text/markdown"));
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let mut file = storage.provider.retrieve(id).await.unwrap();
        let mut content = Vec::new();
        file.content.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"second");

        assert_eq!(storage.row_count("public", "file_storage").await, 1);
        assert_eq!(storage.large_object_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_stores_to_one_document_leave_one_object() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let provider = storage.provider.clone();
            handles.push(tokio::spawn(async move {
                let data = vec![i; 1000 + i as usize];
                provider
                    .store_bytes(id, &format!("v{i}.bin"), &data, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(storage.row_count("public", "file_storage").await, 1);
        assert_eq!(storage.large_object_count().await, 1);

        let mut file = storage.provider.retrieve(id).await.unwrap();
        let mut content = Vec::new();
        file.content.read_to_end(&mut content).await.unwrap();
        let marker = content[0];
        assert_eq!(file.file_name, format!("v{marker}.bin"));
        assert_eq!(content, vec![marker; 1000 + marker as usize]);
    }
}

mod delete {
    use super::*;

    #[tokio::test]
    async fn delete_removes_row_and_object() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();
        storage
            .provider
            .store_bytes(id, "gone.txt", b"bye", None)
            .await
            .unwrap();

        assert!(storage.provider.delete(id).await.unwrap());
        assert_eq!(storage.large_object_count().await, 0);
        assert_eq!(storage.row_count("public", "file_storage").await, 0);

        let err = storage.provider.retrieve(id).await.err().unwrap();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), format!("File for document {id} not found"));

        let err = storage.provider.delete(id).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn retrieve_of_unknown_document_is_not_found() {
        let storage = TestStorage::spawn().await;
        let err = storage
            .provider
            .retrieve(Uuid::new_v4())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FileStorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_one_document_keeps_the_others() {
        let storage = TestStorage::spawn().await;
        let keep = Uuid::new_v4();
        let drop_id = Uuid::new_v4();
        storage
            .provider
            .store_bytes(keep, "keep.txt", b"keep", None)
            .await
            .unwrap();
        storage
            .provider
            .store_bytes(drop_id, "drop.txt", b"drop", None)
            .await
            .unwrap();

        storage.provider.delete(drop_id).await.unwrap();

        let remaining = storage.provider.list(&ListFilter::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].document_id, keep);
        assert_eq!(storage.large_object_count().await, 1);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn failed_metadata_write_leaves_no_object() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();

        // PostgreSQL rejects NUL in TEXT, so the row insert fails after the
        // large object has been written.
        let err = storage
            .provider
            .store_bytes(id, "bad\0name", &payload(20_000), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FileStorageError::Database { operation: "store", .. }));

        assert_eq!(storage.large_object_count().await, 0);
        let err = storage.provider.retrieve(id).await.err().unwrap();
        assert!(err.is_not_found());
        assert_eq!(storage.pool.in_use(), 0);
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_file() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();
        let original = storage
            .provider
            .store_bytes(id, "good.txt", b"still here", None)
            .await
            .unwrap();

        let err = storage
            .provider
            .store_bytes(id, "bad\0name", b"replacement", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FileStorageError::Database { .. }));

        assert_eq!(storage.large_object_count().await, 1);
        let mut sink = Vec::new();
        let record = storage.provider.retrieve_into(id, &mut sink).await.unwrap();
        assert_eq!(record.blob_ref, original.blob_ref);
        assert_eq!(sink, b"still here");
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let provider = FileStorageProvider::new(StorageConfig::default()).unwrap();
        assert!(!provider.is_initialized());

        let err = provider
            .store_bytes(Uuid::new_v4(), "x", b"x", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FileStorageError::NotInitialized));
        assert!(matches!(
            provider.list(&ListFilter::new()).await,
            Err(FileStorageError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn operations_after_shutdown_fail() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();
        storage
            .provider
            .store_bytes(id, "x.txt", b"x", None)
            .await
            .unwrap();

        let pool = storage.provider.shutdown().unwrap();
        pool.close().await;
        assert!(!storage.provider.is_initialized());

        let err = storage.provider.retrieve(id).await.err().unwrap();
        assert!(matches!(err, FileStorageError::NotInitialized));
        assert!(storage.provider.shutdown().is_none());
    }

    #[tokio::test]
    async fn cancelled_store_leaves_no_object() {
        let storage = TestStorage::spawn().await;
        let id = Uuid::new_v4();

        // The writer never finishes, so the store stalls after a few chunks.
        let (mut tx, rx) = tokio::io::duplex(64 * 1024);
        tx.write_all(&payload(40_000)).await.unwrap();

        let stalled = tokio::time::timeout(
            Duration::from_millis(500),
            storage.provider.store(id, "partial.bin", Box::new(rx), None),
        )
        .await;
        assert!(stalled.is_err(), "store should still be waiting for input");
        drop(tx);

        assert_eq!(storage.large_object_count().await, 0);
        let err = storage.provider.retrieve(id).await.err().unwrap();
        assert!(err.is_not_found());
        assert_eq!(storage.pool.in_use(), 0);
    }
}
