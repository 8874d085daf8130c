use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

use crate::types::Attachment;

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Layout: `<base>/<first_2_hex_chars>/<full_hex>.<ext>`
pub fn attachment_path(attachments_dir: &Path, hash_hex: &str, ext: &str) -> PathBuf {
    attachments_dir
        .join(&hash_hex[..2])
        .join(format!("{hash_hex}.{ext}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub hash_hex: String,
    pub path: PathBuf,
}

/// Content-addressed copy of every attachment the pipeline reads. Storing the
/// same bytes twice lands on the same path.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store(&self, attachment: &Attachment) -> io::Result<StoredAttachment> {
        let hash_hex = to_hex(&sha256_bytes(&attachment.data));
        let path = attachment_path(&self.root, &hash_hex, &attachment.extension());

        if tokio::fs::try_exists(&path).await? {
            return Ok(StoredAttachment { hash_hex, path });
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &attachment.data).await?;
        tracing::debug!(path = %path.display(), "attachment stored");

        Ok(StoredAttachment { hash_hex, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_bytes_known_vector() {
        let hex = to_hex(&sha256_bytes(b""));
        assert_eq!(hex, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn attachment_path_layout() {
        let base = PathBuf::from("/data/attachments");
        let hash = "abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";
        assert_eq!(
            attachment_path(&base, hash, "pdf"),
            PathBuf::from(format!("/data/attachments/ab/{hash}.pdf"))
        );
    }

    #[tokio::test]
    async fn store_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path());

        let a = store
            .store(&Attachment::new("Invoice.PDF", b"%PDF-1.4 one".to_vec()))
            .await
            .unwrap();
        let b = store.store(&Attachment::new("copy.pdf", b"%PDF-1.4 one".to_vec())).await.unwrap();
        let c = store.store(&Attachment::new("other.pdf", b"%PDF-1.4 two".to_vec())).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a.path, c.path);
        assert_eq!(a.hash_hex.len(), 64);
        assert!(a.path.starts_with(dir.path().join(&a.hash_hex[..2])));
        assert_eq!(a.path.extension().unwrap(), "pdf");
        assert_eq!(std::fs::read(&a.path).unwrap(), b"%PDF-1.4 one");
    }
}
