use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::NusError;

const BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 of a file as lowercase hex, read in fixed-size chunks.
pub fn digest(path: &Path) -> Result<String, NusError> {
    let mut file = File::open(path)
        .map_err(|err| NusError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| NusError::Filesystem(format!("read {}: {err}", path.display())))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn matches(path: &Path, expected: &str) -> Result<bool, NusError> {
    Ok(digest(path)?.eq_ignore_ascii_case(expected.trim()))
}

/// Like [`matches`], but reports a mismatch as [`NusError::HashMismatch`].
pub fn verify(path: &Path, expected: &str) -> Result<(), NusError> {
    let actual = digest(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(NusError::HashMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn digest_known_vector() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(digest(&path).unwrap(), ABC_SHA256);
        assert!(matches(&path, &ABC_SHA256.to_uppercase()).unwrap());
    }

    #[test]
    fn verify_reports_mismatch() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("abc.bin");
        std::fs::write(&path, b"abd").unwrap();
        let err = verify(&path, ABC_SHA256).unwrap_err();
        assert_matches!(err, NusError::HashMismatch { .. });
    }

    #[test]
    fn digest_missing_file_is_filesystem_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = digest(&temp.path().join("missing")).unwrap_err();
        assert_matches!(err, NusError::Filesystem(_));
    }
}
