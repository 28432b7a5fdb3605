//! 设备手册检索索引。
//!
//! 手册按段落切块（块长800、重叠80），用确定性的哈希词袋向量编码后
//! 连同原文落盘为JSON块存储；检索时对问题向量做余弦相似度Top-K。
//! 编码器放在trait后面，替换真实向量模型时不动索引与检索逻辑。

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// 块长（字符数）
pub const CHUNK_SIZE: usize = 800;

/// 相邻块的重叠（字符数）
pub const CHUNK_OVERLAP: usize = 80;

/// 哈希词袋向量的维度
const EMBED_DIM: usize = 256;

/// 块存储文件名
const STORE_FILE: &str = "chunks.json";

/// 文档索引错误
#[derive(Debug, Error)]
pub enum DocIndexError {
    #[error("failed to access document index: {0}")]
    Io(#[from] std::io::Error),
    #[error("document index store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// 文本编码器接口
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dim(&self) -> usize;
}

/// 确定性哈希词袋编码器。
///
/// 分词取小写字母数字串，每个词经MD5映射到固定桶，词频向量做L2归一化。
/// 无外部依赖、跨进程稳定，足以支撑演示语料上的语义近邻检索。
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { dim: EMBED_DIM }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = Md5::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let head = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        (head as usize) % self.dim
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// 手册文本块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocChunk {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: DocChunk,
    embedding: Vec<f32>,
}

/// 一条检索命中
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

/// 文档索引：内存中的块向量表加JSON落盘
pub struct DocIndex {
    index_dir: PathBuf,
    embedder: Box<dyn EmbeddingProvider>,
    chunks: Vec<StoredChunk>,
}

impl DocIndex {
    /// 打开索引目录，存在块存储时一并加载
    pub fn open(
        index_dir: impl Into<PathBuf>,
        embedder: Box<dyn EmbeddingProvider>,
    ) -> Result<Self, DocIndexError> {
        let index_dir = index_dir.into();
        let store_path = index_dir.join(STORE_FILE);

        let chunks = if store_path.exists() {
            let content = std::fs::read_to_string(&store_path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };

        Ok(Self {
            index_dir,
            embedder,
            chunks,
        })
    }

    /// 重建索引：遍历文档目录下的`.md`/`.txt`手册，切块、编码并落盘。
    /// 返回入库的块数。
    pub fn ingest(&mut self, docs_path: &Path) -> Result<usize, DocIndexError> {
        let mut stored = Vec::new();

        let mut files: Vec<PathBuf> = WalkDir::new(docs_path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("md") | Some("txt")
                )
            })
            .collect();
        files.sort();

        for path in files {
            let content = std::fs::read_to_string(&path)?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "manual".to_string());
            let source = path.to_string_lossy().to_string();

            for (paragraph_idx, chunk_idx, text) in chunk_document(&content) {
                let mut metadata = BTreeMap::new();
                metadata.insert("source".to_string(), source.clone());
                metadata.insert("paragraph".to_string(), paragraph_idx.to_string());

                let embedding = self.embedder.embed(&text);
                stored.push(StoredChunk {
                    chunk: DocChunk {
                        id: format!("{}-p{}-c{}", stem, paragraph_idx, chunk_idx),
                        text,
                        metadata,
                    },
                    embedding,
                });
            }
        }

        std::fs::create_dir_all(&self.index_dir)?;
        let store_path = self.index_dir.join(STORE_FILE);
        std::fs::write(&store_path, serde_json::to_string(&stored)?)?;

        self.chunks = stored;
        Ok(self.chunks.len())
    }

    /// 余弦相似度Top-K检索，命中按分数降序
    pub fn search(&self, query: &str, top_k: usize) -> Vec<DocHit> {
        let query_vector = self.embedder.embed(query);

        let mut scored: Vec<DocHit> = self
            .chunks
            .iter()
            .map(|stored| DocHit {
                id: stored.chunk.id.clone(),
                text: stored.chunk.text.clone(),
                score: cosine(&query_vector, &stored.embedding),
                metadata: stored.chunk.metadata.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// 切块：先按空行分段，过长的段落再按块长/重叠滑窗切分
fn chunk_document(content: &str) -> Vec<(usize, usize, String)> {
    let mut chunks = Vec::new();

    for (paragraph_idx, paragraph) in split_paragraphs(content).into_iter().enumerate() {
        let chars: Vec<char> = paragraph.chars().collect();
        if chars.is_empty() {
            continue;
        }

        let stride = CHUNK_SIZE - CHUNK_OVERLAP;
        let mut chunk_idx = 0;
        let mut start = 0;
        loop {
            let end = (start + CHUNK_SIZE).min(chars.len());
            let text: String = chars[start..end].iter().collect();
            let text = text.trim().to_string();
            if !text.is_empty() {
                chunks.push((paragraph_idx, chunk_idx, text));
                chunk_idx += 1;
            }
            if end == chars.len() {
                break;
            }
            start += stride;
        }
    }

    chunks
}

fn split_paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    // 两侧向量均已归一化，点积即余弦
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// Include tests
#[cfg(test)]
mod tests;
