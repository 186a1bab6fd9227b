//! End-to-end flows over persistent storage: index, search, re-open,
//! model switch, and prompt augmentation.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use codelib_chunk::Language;
use codelib_embed::HashEmbedder;
use codelib_retriever::retrieval::{ChunkStore, Library, LibraryConfig, Query};
use tempfile::tempdir;

const PY_FILE: &str = "\
import functools


def sort_numbers(items):
    \"\"\"Return the items in ascending order.\"\"\"
    return sorted(items)


def parse_config(path):
    \"\"\"Read a config file into a dict.\"\"\"
    with open(path) as f:
        return dict(line.split('=') for line in f)
";

const RS_FILE: &str = "\
pub fn read_lines(path: &str) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(String::from).collect())
}
";

fn permissive_config() -> LibraryConfig {
    LibraryConfig::new().with_similarity_threshold(0.0)
}

#[tokio::test]
async fn sort_query_ranks_sort_function_first() {
    let library = Library::open_in_memory(Arc::new(HashEmbedder::default()), permissive_config())
        .await
        .unwrap();
    library.index_file("a.py", PY_FILE, None).await.unwrap();
    library.index_file("b.rs", RS_FILE, None).await.unwrap();

    let result = library
        .retrieve(&Query::new("a function that sorts a list of numbers").with_top_k(5))
        .await
        .unwrap();

    assert!(!result.hits.is_empty());
    let top = &result.hits[0];
    assert_eq!(top.chunk.source_path, "a.py");
    assert!(top.chunk.text.contains("sort_numbers"));
}

#[tokio::test]
async fn index_survives_reopen_without_reindexing() {
    let dir = tempdir().unwrap();

    {
        let library = Library::open(
            dir.path(),
            Arc::new(HashEmbedder::default()),
            permissive_config(),
        )
        .await
        .unwrap();
        library.index_file("a.py", PY_FILE, None).await.unwrap();
    }

    let library = Library::open(
        dir.path(),
        Arc::new(HashEmbedder::default()),
        permissive_config(),
    )
    .await
    .unwrap();

    let stats = library.stats().await.unwrap();
    assert!(stats.index_entries >= 1);
    assert_eq!(stats.store.files, 1);

    let result = library
        .retrieve(&Query::new("function that sorts a list"))
        .await
        .unwrap();
    assert!(result.hits[0].chunk.text.contains("sort_numbers"));
}

#[tokio::test]
async fn reopening_with_a_different_model_re_embeds() {
    let dir = tempdir().unwrap();

    {
        let library = Library::open(
            dir.path(),
            Arc::new(HashEmbedder::new(256)),
            permissive_config(),
        )
        .await
        .unwrap();
        library.index_file("a.py", PY_FILE, None).await.unwrap();
    }

    // Same storage, narrower embedder: the stored vectors no longer match
    // and must be regenerated from the retained chunk text.
    let library = Library::open(
        dir.path(),
        Arc::new(HashEmbedder::new(128)),
        permissive_config(),
    )
    .await
    .unwrap();

    let stats = library.stats().await.unwrap();
    assert_eq!(stats.dimension, 128);
    assert_eq!(stats.store.chunks, stats.store.embedded_chunks);

    let result = library
        .retrieve(&Query::new("function that sorts a list"))
        .await
        .unwrap();
    assert!(result.hits[0].chunk.text.contains("sort_numbers"));
}

#[tokio::test]
async fn language_filter_narrows_results_across_files() {
    let library = Library::open_in_memory(Arc::new(HashEmbedder::default()), permissive_config())
        .await
        .unwrap();
    library.index_file("a.py", PY_FILE, None).await.unwrap();
    library.index_file("b.rs", RS_FILE, None).await.unwrap();

    let result = library
        .retrieve(
            &Query::new("read a file into lines")
                .with_language(Language::Rust)
                .with_top_k(10),
        )
        .await
        .unwrap();

    assert!(!result.hits.is_empty());
    for hit in &result.hits {
        assert_eq!(hit.chunk.language, Language::Rust);
    }
}

#[tokio::test]
async fn augmented_prompt_respects_budget_and_order() {
    let config = permissive_config().with_max_context_chars(400);
    let library = Library::open_in_memory(Arc::new(HashEmbedder::default()), config)
        .await
        .unwrap();
    library.index_file("a.py", PY_FILE, None).await.unwrap();
    library.index_file("b.rs", RS_FILE, None).await.unwrap();

    let request = "write a function that sorts a list";
    let prompt = library.augment_request(request).await.unwrap();

    assert!(prompt.ends_with(request));
    // Everything before the request fits the configured budget plus framing.
    let context_len = prompt.len() - request.len();
    assert!(context_len < 500, "context too large: {context_len}");
}

#[tokio::test]
async fn clear_persists_across_reopen() {
    let dir = tempdir().unwrap();

    {
        let library = Library::open(
            dir.path(),
            Arc::new(HashEmbedder::default()),
            permissive_config(),
        )
        .await
        .unwrap();
        library.index_file("a.py", PY_FILE, None).await.unwrap();
        library.clear().await.unwrap();
    }

    let library = Library::open(
        dir.path(),
        Arc::new(HashEmbedder::default()),
        permissive_config(),
    )
    .await
    .unwrap();
    let stats = library.stats().await.unwrap();
    assert_eq!(stats.store.files, 0);
    assert_eq!(stats.index_entries, 0);
}

#[tokio::test]
async fn files_indexed_after_a_clear_survive_reopen() {
    let dir = tempdir().unwrap();

    {
        let library = Library::open(
            dir.path(),
            Arc::new(HashEmbedder::default()),
            permissive_config(),
        )
        .await
        .unwrap();
        library.index_file("old.py", "def old():\n    pass\n", None).await.unwrap();
        library.clear().await.unwrap();
        library.index_file("a.py", PY_FILE, None).await.unwrap();
    }

    let library = Library::open(
        dir.path(),
        Arc::new(HashEmbedder::default()),
        permissive_config(),
    )
    .await
    .unwrap();

    let stats = library.stats().await.unwrap();
    assert_eq!(stats.store.files, 1);
    assert!(stats.index_entries >= 1);

    let result = library
        .retrieve(&Query::new("function that sorts a list"))
        .await
        .unwrap();
    assert!(result.hits[0].chunk.text.contains("sort_numbers"));
}

#[tokio::test]
async fn corrupt_embedding_blob_triggers_rebuild_on_open() {
    let dir = tempdir().unwrap();

    {
        let library = Library::open(
            dir.path(),
            Arc::new(HashEmbedder::default()),
            permissive_config(),
        )
        .await
        .unwrap();
        library.index_file("a.py", PY_FILE, None).await.unwrap();
    }

    {
        // Damage every stored vector: an odd-length blob cannot be a valid
        // f16 embedding.
        let store = ChunkStore::open(dir.path()).await.unwrap();
        sqlx::query("UPDATE chunks SET embedding = ?1")
            .bind(&[0x01u8, 0x02, 0x03][..])
            .execute(store.pool())
            .await
            .unwrap();
    }

    let library = Library::open(
        dir.path(),
        Arc::new(HashEmbedder::default()),
        permissive_config(),
    )
    .await
    .unwrap();

    let stats = library.stats().await.unwrap();
    assert_eq!(stats.store.chunks, stats.store.embedded_chunks);
    assert!(stats.index_entries >= 1);

    let result = library
        .retrieve(&Query::new("function that sorts a list"))
        .await
        .unwrap();
    assert!(result.hits[0].chunk.text.contains("sort_numbers"));
}

#[tokio::test]
async fn querying_with_a_chunks_own_text_is_a_near_perfect_match() {
    let library = Library::open_in_memory(Arc::new(HashEmbedder::default()), permissive_config())
        .await
        .unwrap();
    library.index_file("a.py", PY_FILE, None).await.unwrap();

    let seed = library
        .retrieve(&Query::new("sort numbers").with_top_k(1))
        .await
        .unwrap();
    let chunk_text = seed.hits[0].chunk.text.clone();

    let result = library
        .retrieve(&Query::new(chunk_text).with_top_k(1))
        .await
        .unwrap();
    assert!(result.hits[0].score >= 0.99, "score {}", result.hits[0].score);
}

#[tokio::test]
async fn chunk_ids_are_stable_across_a_full_reindex() {
    let library = Library::open_in_memory(Arc::new(HashEmbedder::default()), permissive_config())
        .await
        .unwrap();
    library.index_file("a.py", PY_FILE, None).await.unwrap();
    let before = library
        .retrieve(&Query::new("sort numbers").with_top_k(1))
        .await
        .unwrap()
        .hits[0]
        .chunk
        .id;

    library.clear().await.unwrap();
    library.index_file("a.py", PY_FILE, None).await.unwrap();
    let after = library
        .retrieve(&Query::new("sort numbers").with_top_k(1))
        .await
        .unwrap()
        .hits[0]
        .chunk
        .id;

    assert_eq!(before, after);
}

#[tokio::test]
async fn batch_indexing_is_idempotent() {
    let library = Library::open_in_memory(Arc::new(HashEmbedder::default()), permissive_config())
        .await
        .unwrap();
    let files = vec![
        ("a.py".to_string(), PY_FILE.to_string()),
        ("b.rs".to_string(), RS_FILE.to_string()),
    ];
    let cancel = AtomicBool::new(false);

    let first = library.index_files(&files, &cancel).await.unwrap();
    assert_eq!(first.files_indexed, 2);

    let second = library.index_files(&files, &cancel).await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_unchanged, 2);
}
