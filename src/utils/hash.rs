use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// SHA-256 of an in-memory buffer, lowercase hex.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a file, streamed so large artifacts never load whole.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .context(format!("Failed to open {} for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .context(format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_bytes_known_vector() {
        // sha256 of the empty string
        assert_eq!(
            sha256_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_file_matches_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"triage bundle content").unwrap();
        file.flush().unwrap();

        let from_file = sha256_file(file.path()).unwrap();
        assert_eq!(from_file, sha256_bytes(b"triage bundle content"));
    }

    #[test]
    fn test_sha256_file_missing_errors() {
        assert!(sha256_file(Path::new("/nonexistent/file")).is_err());
    }
}
