//! Model asset resolution.

use std::{
    fmt, fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

/// Where to load a model from.
#[derive(Clone)]
pub enum ModelAsset {
    /// A local `.onnx` file.
    Path(PathBuf),
    /// An `http://` or `https://` URL. Downloaded once and cached on disk.
    Url(String),
    /// An in-memory ONNX model.
    Bytes(Arc<[u8]>),
}

impl ModelAsset {
    /// Interprets `s` as a URL if it has an HTTP(S) scheme, and as a file path otherwise.
    pub fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Url(s.to_string())
        } else {
            Self::Path(s.into())
        }
    }

    /// Loads the raw model data, downloading it first if necessary.
    pub fn load(&self) -> anyhow::Result<Arc<[u8]>> {
        match self {
            Self::Path(path) => read_onnx_file(path),
            Self::Url(url) => {
                let cached = cache_path(url)?;
                if cached.is_file() {
                    log::debug!("using cached model {} for {}", cached.display(), url);
                    return read_onnx_file(&cached);
                }
                let data = download(url)?;
                if let Err(e) = store(&cached, &data) {
                    // Not fatal, we'll just download it again next time.
                    log::warn!("failed to cache model at {}: {e:#}", cached.display());
                }
                Ok(data.into())
            }
            Self::Bytes(data) => Ok(data.clone()),
        }
    }
}

impl fmt::Debug for ModelAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
        }
    }
}

impl From<PathBuf> for ModelAsset {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ModelAsset {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ModelAsset {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(data.into())
    }
}

fn read_onnx_file(path: &Path) -> anyhow::Result<Arc<[u8]>> {
    match path.extension() {
        Some(ext) if ext == "onnx" => {}
        _ => bail!(
            "model file must have `.onnx` extension: {}",
            path.display()
        ),
    }

    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(data.into())
}

/// Maps a model URL to its location in the download cache.
fn cache_path(url: &str) -> anyhow::Result<PathBuf> {
    let Some(cache) = dirs::cache_dir() else {
        bail!("no cache directory available on this platform");
    };
    let key = hex::encode(Sha256::digest(url.as_bytes()));
    Ok(cache
        .join(env!("CARGO_PKG_NAME"))
        .join("models")
        .join(format!("{key}.onnx")))
}

fn download(url: &str) -> anyhow::Result<Vec<u8>> {
    log::info!("downloading model from {url}");
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;
    let mut data = Vec::new();
    response.into_reader().read_to_end(&mut data)?;
    log::debug!("downloaded {} bytes", data.len());
    Ok(data)
}

fn store(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    // Write to a temporary file first so that a partial download never looks like a cached model.
    let tmp = path.with_extension("part");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_or_path() {
        assert!(matches!(
            ModelAsset::parse("https://example.com/hand.onnx"),
            ModelAsset::Url(_)
        ));
        assert!(matches!(
            ModelAsset::parse("http://localhost/hand.onnx"),
            ModelAsset::Url(_)
        ));
        assert!(matches!(
            ModelAsset::parse("models/hand.onnx"),
            ModelAsset::Path(_)
        ));
    }

    #[test]
    fn bytes_load_as_is() {
        let asset = ModelAsset::from(vec![1, 2, 3]);
        assert_eq!(&*asset.load().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn path_requires_onnx_extension() {
        let err = ModelAsset::parse("hand_landmarker.task").load().unwrap_err();
        assert!(err.to_string().contains(".onnx"), "{err}");
    }

    #[test]
    fn missing_file() {
        ModelAsset::parse("/nonexistent/dir/hand.onnx")
            .load()
            .unwrap_err();
    }

    #[test]
    fn cache_key_is_stable() {
        if dirs::cache_dir().is_none() {
            return;
        }
        let a = cache_path("https://example.com/a.onnx").unwrap();
        let b = cache_path("https://example.com/a.onnx").unwrap();
        let c = cache_path("https://example.com/b.onnx").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.extension().unwrap(), "onnx");
    }
}
