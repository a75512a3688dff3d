//! Payload object files.
//!
//! Each content block's bytes live in one immutable file at
//! `objects/{algorithm}/{prefix}/{suffix}`. Files are written atomically and
//! verified against their hash on every read.

use crate::error::{Error, Result};
use crate::hash::{Algorithm, ContentHash};
use crate::object::{CompressionType, HEADER_SIZE, ObjectHeader, ObjectType};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default compression threshold: payloads >= 4KB are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

/// On-disk storage for content block payloads.
#[derive(Debug)]
pub struct PayloadStore {
    objects_dir: PathBuf,
    algorithm: Algorithm,
    compression_threshold: usize,
}

impl PayloadStore {
    /// Open the payload store rooted at `{vault}/objects/{algorithm}`.
    pub fn new(vault_root: &Path, algorithm: Algorithm, compression_threshold: usize) -> Self {
        Self {
            objects_dir: vault_root.join("objects").join(algorithm.as_str()),
            algorithm,
            compression_threshold,
        }
    }

    /// Directory holding the shard directories.
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Get the path to an object file given its hash.
    ///
    /// Returns: `objects/{algorithm}/{prefix}/{suffix}`
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.objects_dir.join(hash.prefix()).join(hash.suffix())
    }

    /// Whether a payload file exists for the hash.
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.object_path(hash).exists()
    }

    /// Store a payload under its hash.
    ///
    /// Returns `true` if a new file was written, `false` if the payload was
    /// already present.
    pub fn put(&self, hash: &ContentHash, payload: &[u8]) -> Result<bool> {
        if self.contains(hash) {
            return Ok(false);
        }

        let (stored, compression) = if payload.len() >= self.compression_threshold {
            (compress_zstd(payload)?, CompressionType::Zstd)
        } else {
            (payload.to_vec(), CompressionType::None)
        };

        let header = ObjectHeader::blob(self.algorithm, compression, stored.len() as u64);
        self.write_object_atomic(hash, &header, &stored)?;

        debug!(
            %hash,
            size = payload.len(),
            compression = compression.as_str(),
            "wrote payload object"
        );
        Ok(true)
    }

    /// Write an object atomically using tempfile.
    fn write_object_atomic(
        &self,
        hash: &ContentHash,
        header: &ObjectHeader,
        payload: &[u8],
    ) -> Result<()> {
        let obj_path = self.object_path(hash);
        let shard_dir = obj_path
            .parent()
            .ok_or_else(|| Error::invalid_store(&obj_path, "object path has no parent"))?;
        fs::create_dir_all(shard_dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(shard_dir)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(payload)?;
        temp_file.flush()?;
        temp_file.persist(&obj_path)?;

        Ok(())
    }

    /// Read a payload, decompressing and verifying it against its hash.
    pub fn get(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let obj_path = self.object_path(hash);

        let mut file = match fs::File::open(&obj_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::object_not_found(hash.to_hex()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = ObjectHeader::decode(&header_buf)?;

        if header.object_type != ObjectType::Blob {
            return Err(Error::corrupted_object(
                &obj_path,
                format!("unexpected object type {}", header.object_type.as_str()),
            ));
        }

        let mut stored = Vec::new();
        file.read_to_end(&mut stored)?;

        if stored.len() as u64 != header.payload_len {
            return Err(Error::corrupted_object(
                &obj_path,
                format!(
                    "Payload length mismatch: expected {}, got {}",
                    header.payload_len,
                    stored.len()
                ),
            ));
        }

        let payload = match header.compression {
            CompressionType::None => stored,
            CompressionType::Zstd => decompress_zstd(&stored)?,
        };

        let computed = ContentHash::of(&payload);
        if computed != *hash {
            return Err(Error::corrupted_object(
                &obj_path,
                format!("Hash mismatch: expected {}, got {}", hash, computed),
            ));
        }

        Ok(payload)
    }

    /// Remove a payload file.
    ///
    /// Returns the number of bytes freed on disk, or `None` if the file was
    /// already gone. Empty shard directories are cleaned up.
    pub fn remove(&self, hash: &ContentHash) -> Result<Option<u64>> {
        let obj_path = self.object_path(hash);

        let size = match fs::metadata(&obj_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match fs::remove_file(&obj_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if let Some(shard_dir) = obj_path.parent()
            && let Ok(mut entries) = fs::read_dir(shard_dir)
            && entries.next().is_none()
        {
            let _ = fs::remove_dir(shard_dir);
        }

        debug!(%hash, size, "removed payload object");
        Ok(Some(size))
    }

    /// List every payload file with its on-disk size.
    ///
    /// Files whose name does not form a valid hash are skipped.
    pub fn list(&self) -> Result<Vec<(ContentHash, u64)>> {
        let mut objects = Vec::new();
        if !self.objects_dir.exists() {
            return Ok(objects);
        }

        for shard_entry in fs::read_dir(&self.objects_dir)? {
            let shard_path = shard_entry?.path();
            if !shard_path.is_dir() {
                continue;
            }

            let prefix = shard_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            for obj_entry in fs::read_dir(&shard_path)? {
                let obj_entry = obj_entry?;
                let obj_path = obj_entry.path();
                if !obj_path.is_file() {
                    continue;
                }

                let suffix = obj_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if let Ok(hash) = ContentHash::from_hex(&format!("{}{}", prefix, suffix)) {
                    objects.push((hash, obj_entry.metadata()?.len()));
                }
            }
        }

        objects.sort();
        Ok(objects)
    }
}

/// Compress data using zstd.
fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 3) // Level 3 = fast compression
        .map_err(|e| Error::compression_error(format!("zstd compression failed: {}", e)))
}

/// Decompress data using zstd.
fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| Error::compression_error(format!("zstd decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> PayloadStore {
        PayloadStore::new(
            temp_dir.path(),
            Algorithm::Blake3,
            DEFAULT_COMPRESSION_THRESHOLD,
        )
    }

    #[test]
    fn test_object_path_layout() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let hash = ContentHash::of(b"test");
        let path = payloads.object_path(&hash);
        assert!(path.ends_with(format!("objects/blake3-256/{}/{}", hash.prefix(), hash.suffix())));
    }

    #[test]
    fn test_put_get_small() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let data = b"hello world";
        let hash = ContentHash::of(data);
        assert!(payloads.put(&hash, data).unwrap());
        assert!(payloads.contains(&hash));
        assert_eq!(payloads.get(&hash).unwrap(), data);
    }

    #[test]
    fn test_put_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let data = b"same content";
        let hash = ContentHash::of(data);
        assert!(payloads.put(&hash, data).unwrap());
        assert!(!payloads.put(&hash, data).unwrap());
        assert_eq!(payloads.list().unwrap().len(), 1);
    }

    #[test]
    fn test_large_payload_is_compressed() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let data = vec![0xAB; 64 * 1024];
        let hash = ContentHash::of(&data);
        payloads.put(&hash, &data).unwrap();

        let raw = fs::read(payloads.object_path(&hash)).unwrap();
        let header = ObjectHeader::decode(&raw).unwrap();
        assert_eq!(header.compression, CompressionType::Zstd);
        assert!(raw.len() < data.len());
        assert_eq!(payloads.get(&hash).unwrap(), data);
    }

    #[test]
    fn test_get_missing() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let result = payloads.get(&ContentHash::of(b"nonexistent"));
        assert!(matches!(result, Err(Error::ObjectNotFound { .. })));
    }

    #[test]
    fn test_corruption_detection() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let data = b"test payload";
        let hash = ContentHash::of(data);
        payloads.put(&hash, data).unwrap();

        let obj_path = payloads.object_path(&hash);
        let mut raw = fs::read(&obj_path).unwrap();
        raw[HEADER_SIZE] ^= 0xFF;
        fs::write(&obj_path, raw).unwrap();

        assert!(matches!(
            payloads.get(&hash),
            Err(Error::CorruptedObject { .. })
        ));
    }

    #[test]
    fn test_truncated_payload_detected() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let data = b"truncate me please";
        let hash = ContentHash::of(data);
        payloads.put(&hash, data).unwrap();

        let obj_path = payloads.object_path(&hash);
        let raw = fs::read(&obj_path).unwrap();
        fs::write(&obj_path, &raw[..raw.len() - 3]).unwrap();

        assert!(payloads.get(&hash).is_err());
    }

    #[test]
    fn test_remove_cleans_shard() {
        let temp_dir = TempDir::new().unwrap();
        let payloads = store(&temp_dir);

        let data = b"remove me";
        let hash = ContentHash::of(data);
        payloads.put(&hash, data).unwrap();

        let freed = payloads.remove(&hash).unwrap();
        assert!(freed.unwrap() > 0);
        assert!(!payloads.contains(&hash));
        assert!(!payloads.object_path(&hash).parent().unwrap().exists());

        assert_eq!(payloads.remove(&hash).unwrap(), None);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 56,
            max_shrink_iters: 1000,
            ..ProptestConfig::default()
        })]

        /// Compression is lossless and respects the threshold
        #[test]
        fn prop_payload_roundtrip(data in prop::collection::vec(any::<u8>(), 0..10_000)) {
            let temp_dir = TempDir::new().unwrap();
            let payloads = store(&temp_dir);

            let hash = ContentHash::of(&data);
            payloads.put(&hash, &data)?;
            prop_assert_eq!(payloads.get(&hash)?, data.clone());

            let raw = fs::read(payloads.object_path(&hash))?;
            let header = ObjectHeader::decode(&raw)?;
            let expected = if data.len() < DEFAULT_COMPRESSION_THRESHOLD {
                CompressionType::None
            } else {
                CompressionType::Zstd
            };
            prop_assert_eq!(header.compression, expected);
        }
    }
}
