//! The supervisor's log file: appending, tailing, and following.

use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

const TAIL_BLOCK: u64 = 8 * 1024;
const FOLLOW_POLL: Duration = Duration::from_millis(250);

/// Open the log file for appending, creating it and its directory.
pub fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// The last `n` lines of the file, oldest first.
///
/// Reads backwards in blocks so a large log is never loaded whole.
pub fn tail(path: &Path, n: usize) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut start = len;
    let mut buf: Vec<u8> = Vec::new();
    loop {
        // A trailing newline terminates the last line, it does not start one.
        let newlines = buf.iter().filter(|&&b| b == b'\n').count();
        let ends_with_newline = buf.last() == Some(&b'\n');
        let complete = newlines - usize::from(ends_with_newline);
        if complete >= n || start == 0 {
            break;
        }
        let read_from = start.saturating_sub(TAIL_BLOCK);
        let mut block = vec![0u8; (start - read_from) as usize];
        file.seek(SeekFrom::Start(read_from))?;
        file.read_exact(&mut block)?;
        block.extend_from_slice(&buf);
        buf = block;
        start = read_from;
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// Write the last `n` lines, then keep copying new content to `out` until
/// `shutdown` resolves. A truncated or rotated file is reread from the start.
pub async fn follow<W, F>(path: &Path, n: usize, out: &mut W, shutdown: F) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    for line in tail(path, n)? {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await?;

    let mut offset = tokio::fs::metadata(path).await?.len();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            _ = tokio::time::sleep(FOLLOW_POLL) => {}
        }

        let len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if len < offset {
            offset = 0;
        }
        if len == offset {
            continue;
        }

        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::with_capacity((len - offset) as usize);
        file.take(len - offset).read_to_end(&mut chunk).await?;
        offset += chunk.len() as u64;
        out.write_all(&chunk).await?;
        out.flush().await?;
    }
}
