#[cfg(test)]
mod tests {
    use crate::sources::doc_index::{
        DocIndex, EmbeddingProvider, HashingEmbedder, chunk_document,
    };
    use tempfile::TempDir;

    fn open_index(temp_dir: &TempDir) -> DocIndex {
        DocIndex::open(
            temp_dir.path().join("doc_index"),
            Box::new(HashingEmbedder::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new();
        let a = embedder.embed("stage calibration procedure");
        let b = embedder.embed("stage calibration procedure");

        assert_eq!(a, b);
        assert_eq!(a.len(), embedder.dim());

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_chunk_document_splits_paragraphs_and_windows() {
        let long_paragraph = "calibration ".repeat(120);
        let content = format!("First paragraph.\n\n{}\n\nLast one.", long_paragraph);

        let chunks = chunk_document(&content);

        assert_eq!(chunks[0], (0, 0, "First paragraph.".to_string()));
        // 长段落被滑窗切成多块
        let middle: Vec<_> = chunks.iter().filter(|(p, _, _)| *p == 1).collect();
        assert!(middle.len() > 1);
        assert_eq!(middle[0].1, 0);
        assert_eq!(middle[1].1, 1);
        assert!(chunks.iter().any(|(p, _, t)| *p == 2 && t == "Last one."));
    }

    #[test]
    fn test_ingest_and_search_rank_relevant_manual_first() {
        let temp_dir = TempDir::new().unwrap();
        let docs = temp_dir.path().join("manuals");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(
            docs.join("stage.md"),
            "Stage calibration procedure: home the stage, run the prealigner check.",
        )
        .unwrap();
        std::fs::write(
            docs.join("lamp.md"),
            "Illumination lamp replacement steps for the optics bench.",
        )
        .unwrap();

        let mut index = open_index(&temp_dir);
        let count = index.ingest(&docs).unwrap();
        assert_eq!(count, 2);

        let hits = index.search("how do I run the stage calibration procedure", 2);
        assert!(!hits.is_empty());
        assert!(hits[0].id.starts_with("stage-"));
        assert!(hits[0].score > 0.0);
        assert_eq!(
            hits[0].metadata.get("source").map(|s| s.contains("stage.md")),
            Some(true)
        );
        if hits.len() == 2 {
            assert!(hits[0].score >= hits[1].score);
        }
    }

    #[test]
    fn test_open_reloads_persisted_store() {
        let temp_dir = TempDir::new().unwrap();
        let docs = temp_dir.path().join("manuals");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("focus.txt"), "Focus drift troubleshooting guide.").unwrap();

        {
            let mut index = open_index(&temp_dir);
            index.ingest(&docs).unwrap();
        }

        let reopened = open_index(&temp_dir);
        assert_eq!(reopened.len(), 1);

        let hits = reopened.search("focus drift", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "focus-p0-c0");
    }

    #[test]
    fn test_search_on_empty_index_returns_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let index = open_index(&temp_dir);

        assert!(index.is_empty());
        assert!(index.search("anything", 5).is_empty());
    }
}
