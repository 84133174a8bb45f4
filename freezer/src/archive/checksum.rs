//! MD5 checksums of archive files, as lowercase hex.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Checksum a file without loading it into memory
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// Checksum an in-memory buffer
pub fn md5_bytes(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_digest() {
        assert_eq!(md5_bytes(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_file_matches_bytes() -> io::Result<()> {
        let data = vec![7u8; READ_BUF_SIZE * 2 + 13];
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(&data)?;
        temp_file.flush()?;

        assert_eq!(md5_file(temp_file.path())?, md5_bytes(&data));
        Ok(())
    }
}
