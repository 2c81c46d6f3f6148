use std::io;

use camino::Utf8Path;
use tempfile::TempDir;

use crate::local::LocalDriver;

impl LocalDriver {
    /// A driver rooted in a fresh temporary directory.
    ///
    /// The directory and every bucket in it are deleted when the driver is
    /// dropped, so this suits tests and throwaway registries.
    pub fn temporary() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let root = Utf8Path::from_path(dir.path())
            .ok_or_else(|| io::Error::other("temporary directory is not utf-8"))?
            .to_owned();

        let mut driver = LocalDriver::new(root);
        driver.scratch = Some(dir);
        Ok(driver)
    }
}
