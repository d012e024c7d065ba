//! File access that refuses a symlink as the last path component.
//!
//! Used for files the host writes into directories a jail can modify.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::OFlag;

/// Create or truncate `path` and write `content`. A new file gets `mode`
/// from the start. Fails with `ELOOP` when `path` is a symlink.
pub fn write(path: &Path, content: &str, mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .custom_flags(OFlag::O_NOFOLLOW.bits())
        .open(path)?;
    file.write_all(content.as_bytes())
}

pub fn read_to_string(path: &Path) -> io::Result<String> {
    let mut file = OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NOFOLLOW.bits())
        .open(path)?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::{PermissionsExt, symlink};

    use super::*;

    #[test]
    fn new_file_is_created_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        write(&path, "token\n", 0o600).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "token\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn existing_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf");
        fs::write(&path, "a much longer previous content\n").unwrap();
        write(&path, "short\n", 0o644).unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "short\n");
    }

    #[test]
    fn symlinked_file_is_neither_written_nor_read() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("passwd");
        fs::write(&outside, "root:x:0:0::/root:/bin/sh\n").unwrap();
        let link = dir.path().join("link.conf");
        symlink(&outside, &link).unwrap();

        assert!(write(&link, "/usr/lib/nvidia\n", 0o644).is_err());
        assert!(read_to_string(&link).is_err());
        assert_eq!(
            fs::read_to_string(&outside).unwrap(),
            "root:x:0:0::/root:/bin/sh\n"
        );
    }
}
