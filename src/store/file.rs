use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// The single on-disk target file, pre-sized to the torrent's total
/// length. All access is positional reads and writes behind one handle.
pub(crate) struct PieceFile {
    file: Mutex<File>,
}

impl PieceFile {
    /// Opens (creating if absent) and sizes the file. Returns the handle
    /// and whether the file already existed, which decides whether startup
    /// verification is worth running.
    pub(crate) async fn open(path: &Path, total_length: u64) -> std::io::Result<(Self, bool)> {
        let existed = tokio::fs::metadata(path).await.is_ok();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await?;
        // Sparse where the filesystem supports it.
        file.set_len(total_length).await?;
        Ok((
            Self {
                file: Mutex::new(file),
            },
            existed,
        ))
    }

    pub(crate) async fn read_at(&self, offset: u64, length: usize) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub(crate) async fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await
    }

    pub(crate) async fn flush(&self) -> std::io::Result<()> {
        let file = self.file.lock().await;
        file.sync_data().await
    }
}
