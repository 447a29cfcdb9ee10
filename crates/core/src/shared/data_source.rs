use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::shared::error::{MediaError, MediaResult};

/// A named thing that produces bytes: the only input boundary of the
/// transcoding core.
#[derive(Clone, Debug)]
pub enum DataSource {
    Path(PathBuf),
    Url(String),
    Bytes { name: String, data: Arc<[u8]> },
    /// A temporary file that is deleted once the last handle is dropped.
    Temp(Arc<NamedTempFile>),
}

/// A source staged on disk. Staged copies are removed on drop; paths that
/// already existed are left alone.
#[derive(Clone, Debug)]
pub struct MaterializedFile {
    path: PathBuf,
    _temp: Option<Arc<NamedTempFile>>,
}

impl MaterializedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
            Self::Bytes { name, .. } => name.clone(),
            Self::Temp(file) => file.path().display().to_string(),
        }
    }

    pub fn new_stream(&self) -> MediaResult<Box<dyn Read + Send>> {
        match self {
            Self::Path(path) => Ok(Box::new(io::BufReader::new(fs::File::open(path)?))),
            Self::Temp(file) => Ok(Box::new(io::BufReader::new(fs::File::open(file.path())?))),
            Self::Bytes { data, .. } => Ok(Box::new(Cursor::new(ArcBytes(data.clone())))),
            Self::Url(url) => {
                let response = reqwest::blocking::get(url)
                    .and_then(|r| r.error_for_status())
                    .map_err(|source| MediaError::Download {
                        url: url.clone(),
                        source,
                    })?;
                Ok(Box::new(response))
            }
        }
    }

    /// Size in bytes when it is known without reading the source.
    pub fn size(&self) -> Option<u64> {
        match self {
            Self::Path(path) => fs::metadata(path).ok().map(|m| m.len()),
            Self::Temp(file) => fs::metadata(file.path()).ok().map(|m| m.len()),
            Self::Bytes { data, .. } => Some(data.len() as u64),
            Self::Url(_) => None,
        }
    }

    pub fn read_all(&self) -> MediaResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size().unwrap_or(0) as usize);
        self.new_stream()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Returns a file path holding the source bytes, staging the source into
    /// a temporary file with the given extension when needed.
    pub fn materialize(&self, extension: &str) -> MediaResult<MaterializedFile> {
        match self {
            Self::Path(path) => Ok(MaterializedFile {
                path: path.clone(),
                _temp: None,
            }),
            Self::Temp(file) => Ok(MaterializedFile {
                path: file.path().to_path_buf(),
                _temp: Some(file.clone()),
            }),
            Self::Bytes { .. } | Self::Url(_) => {
                let mut temp = tempfile::Builder::new()
                    .prefix("reframe-in-")
                    .suffix(&format!(".{extension}"))
                    .tempfile()?;
                io::copy(&mut self.new_stream()?, &mut temp)?;
                temp.flush()?;
                log::debug!("Staged {} at {}", self.name(), temp.path().display());
                Ok(MaterializedFile {
                    path: temp.path().to_path_buf(),
                    _temp: Some(Arc::new(temp)),
                })
            }
        }
    }
}

/// Shares an `Arc<[u8]>` with a `Cursor` without copying.
struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_source_streams_content() {
        let source = DataSource::from_bytes("clip.bin", vec![1u8, 2, 3]);
        assert_eq!(source.size(), Some(3));
        assert_eq!(source.read_all().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_each_stream_starts_at_the_beginning() {
        let source = DataSource::from_bytes("clip.bin", vec![9u8; 10]);
        let mut first = source.new_stream().unwrap();
        let mut buf = [0u8; 4];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(source.read_all().unwrap().len(), 10);
    }

    #[test]
    fn test_path_source_size_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.gif");
        fs::write(&path, b"GIF89a").unwrap();
        let source = DataSource::Path(path.clone());
        assert_eq!(source.size(), Some(6));
        assert_eq!(source.name(), path.display().to_string());
    }

    #[test]
    fn test_materialize_path_uses_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.mp4");
        fs::write(&path, b"data").unwrap();
        let staged = DataSource::Path(path.clone()).materialize("mp4").unwrap();
        assert_eq!(staged.path(), path);
        drop(staged);
        assert!(path.exists());
    }

    #[test]
    fn test_materialize_bytes_is_removed_on_drop() {
        let source = DataSource::from_bytes("clip", vec![5u8; 16]);
        let staged = source.materialize("png").unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(fs::read(&path).unwrap(), vec![5u8; 16]);
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_path_fails_to_open() {
        let source = DataSource::Path(PathBuf::from("/nonexistent/input.gif"));
        assert!(source.new_stream().is_err());
        assert_eq!(source.size(), None);
    }
}
