//! Tar archives of cloned repositories.

use std::fs::File;
use std::io;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

/// Archive flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_compress(compress: bool) -> Self {
        if compress {
            ArchiveFormat::TarGz
        } else {
            ArchiveFormat::Tar
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

/// Pack the directory `src` into `dest`, rooted at `root_name` inside the
/// archive. Symlinks are stored as links.
pub fn create_archive(
    src: &Path,
    dest: &Path,
    root_name: &str,
    format: ArchiveFormat,
) -> io::Result<()> {
    let file = File::create(dest)?;
    match format {
        ArchiveFormat::Tar => {
            let mut builder = tar::Builder::new(file);
            builder.follow_symlinks(false);
            builder.append_dir_all(root_name, src)?;
            builder.into_inner()?.sync_all()
        }
        ArchiveFormat::TarGz => {
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.follow_symlinks(false);
            builder.append_dir_all(root_name, src)?;
            builder.into_inner()?.finish()?.sync_all()
        }
    }
}

/// [`create_archive`] on the blocking pool.
pub async fn create_archive_async(
    src: &Path,
    dest: &Path,
    root_name: &str,
    format: ArchiveFormat,
) -> io::Result<()> {
    let (src, dest, root) = (src.to_path_buf(), dest.to_path_buf(), root_name.to_string());
    tokio::task::spawn_blocking(move || create_archive(&src, &dest, &root, format))
        .await
        .map_err(io::Error::other)?
}
