//! Content digests for upload/download integrity.
//!
//! Files are hashed in fixed-size chunks so memory use is independent of
//! file size, and the handle is rewound afterwards so the same handle can
//! be reused for the subsequent upload.

use sha2::{Digest, Sha256};
use std::io::{self, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Chunk size for streaming hashing.
const BLOCK_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 of a seekable reader and restore its position to the
/// start. Read failures propagate; there are no retries.
pub async fn file_sha256<R>(file: &mut R) -> io::Result<String>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    file.seek(SeekFrom::Start(0)).await?;
    Ok(to_hex(&hasher.finalize()))
}

/// SHA-256 of an in-memory buffer.
pub fn bytes_sha256(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

fn to_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn hashes_known_vectors() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert_eq!(
            file_sha256(&mut empty).await.unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let mut hello = Cursor::new(b"hello world".to_vec());
        assert_eq!(
            file_sha256(&mut hello).await.unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn rewinds_the_handle_after_hashing() {
        let mut file = Cursor::new(b"payload bytes".to_vec());
        let first = file_sha256(&mut file).await.unwrap();
        assert_eq!(file.position(), 0);

        // the same handle hashes identically a second time
        let second = file_sha256(&mut file).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn chunked_and_buffered_digests_agree() {
        // larger than one 64 KiB block
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut file = Cursor::new(data.clone());
        assert_eq!(file_sha256(&mut file).await.unwrap(), bytes_sha256(&data));
    }
}
