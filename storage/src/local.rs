use camino::{Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Storage driver which keeps each bucket in a directory under `root`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
    // Removes the root on drop, for drivers made by `LocalDriver::temporary`.
    #[cfg(feature = "tmp")]
    pub(crate) scratch: Option<tempfile::TempDir>,
}

impl LocalDriver {
    /// Create a driver rooted at the given directory.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            #[cfg(feature = "tmp")]
            scratch: None,
        }
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path.push(remote);
        path
    }

    async fn create_parent(&self, path: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::from_io(self.name(), err))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let remote = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(remote)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);
        tokio::fs::remove_file(remote)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);
        self.create_parent(&remote).await?;

        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&remote)
                .await
                .map_err(|err| StorageError::from_io(self.name(), err))?,
        );

        tokio::io::copy(local, &mut writer)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        writer
            .shutdown()
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);
        self.create_parent(&remote).await?;

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&remote)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;
        let mut writer = tokio::io::BufWriter::new(file);

        let written = tokio::io::copy(local, &mut writer)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        writer
            .shutdown()
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        tracing::trace!(%remote, written, "appended");
        Ok(())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, from);
        let target = self.path(bucket, to);
        self.create_parent(&target).await?;

        tokio::fs::rename(&source, &target).await.map_err(|err| {
            StorageError::builder(self.name(), err.kind().into(), err)
                .bucket(bucket)
                .path(from.as_str())
                .context(format!("rename to {to}"))
                .build()
        })
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let remote = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&remote)
                .await
                .map_err(|err| StorageError::from_io(self.name(), err))?,
        );

        tokio::io::copy(&mut reader, local)
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::from_io(self.name(), err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let mut root = self.root.join(bucket);
        root.push("b");
        let mut target = root.clone();
        if let Some(part) = prefix {
            target.push(part);
        }

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &target))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Other, err))?
            .map_err(|err| StorageError::new(self.name(), StorageErrorKind::Io, err))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }
}

/// Walk `target`, returning file paths relative to `root`.
///
/// A missing `target` directory lists as empty.
#[tracing::instrument]
fn collect_list(root: &Utf8Path, target: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    if target.is_dir() {
        visit(target, &mut files)?;
    } else if target.is_file() {
        files.push(target.to_owned());
    }

    Ok(files
        .into_iter()
        .filter_map(|p| p.strip_prefix(root).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, LocalDriver::new(root))
    }

    #[tokio::test]
    async fn append_then_rename() {
        let (_dir, driver) = driver();
        let scratch = Utf8Path::new("_uploads/abc/data");
        let blob = Utf8Path::new("blobs/sha256/ff");

        driver.upload("r", scratch, &mut &b""[..]).await.unwrap();
        driver.append("r", scratch, &mut &b"hello "[..]).await.unwrap();
        driver.append("r", scratch, &mut &b"there"[..]).await.unwrap();
        driver.rename("r", scratch, blob).await.unwrap();

        let mut out = Vec::new();
        driver.download("r", blob, &mut out).await.unwrap();
        assert_eq!(out, b"hello there");
        assert!(driver.metadata("r", scratch).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_is_relative_to_bucket() {
        let (_dir, driver) = driver();
        for path in ["tags/foo/latest", "tags/foo/v1", "blobs/sha256/aa"] {
            driver
                .upload("r", Utf8Path::new(path), &mut &b"x"[..])
                .await
                .unwrap();
        }

        let mut listed = driver.list("r", Some(Utf8Path::new("tags"))).await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["tags/foo/latest", "tags/foo/v1"]);

        let missing = driver
            .list("r", Some(Utf8Path::new("manifests")))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_dir, driver) = driver();
        let err = driver
            .metadata("r", Utf8Path::new("blobs/nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::NotFound);
    }
}
