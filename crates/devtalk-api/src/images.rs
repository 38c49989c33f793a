use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// 5 MB ceiling for a decoded image
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const URL_PREFIX: &str = "/uploads/";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Image must be a data:image/<type>;base64 URL.")]
    Malformed,

    #[error("Image is {size} bytes; the limit is 5 MB.")]
    TooLarge { size: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Flat directory of uploaded images, served back under `/uploads/`.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub async fn new(dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode an inline image, write it under a fresh name and return its
    /// public path (`/uploads/<uuid>.<ext>`).
    pub async fn save(&self, data_url: &str) -> Result<String, ImageError> {
        let (ext, bytes) = decode_data_url(data_url)?;
        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        fs::write(self.dir.join(&filename), &bytes).await?;
        info!("Stored image {} ({} bytes)", filename, bytes.len());
        Ok(format!("{}{}", URL_PREFIX, filename))
    }

    /// Best-effort removal of previously stored images.
    pub async fn remove_all(&self, urls: &[String]) {
        for url in urls {
            let Some(path) = self.local_path(url) else {
                warn!("Refusing to delete image outside uploads: {}", url);
                continue;
            };
            match fs::remove_file(&path).await {
                Ok(()) => info!("Deleted image {}", path.display()),
                Err(e) => warn!("Failed to delete image {}: {}", path.display(), e),
            }
        }
    }

    /// Map `/uploads/<name>` to a file inside the store, rejecting anything
    /// that would escape the directory.
    fn local_path(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(URL_PREFIX)?;
        let file_name = Path::new(name).file_name()?;
        if file_name != name {
            return None;
        }
        Some(self.dir.join(file_name))
    }
}

/// Split `data:image/<ext>;base64,<payload>` into a lowercase extension and
/// the decoded bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>), ImageError> {
    let rest = data_url
        .strip_prefix("data:image/")
        .ok_or(ImageError::Malformed)?;
    let (ext, payload) = rest.split_once(";base64,").ok_or(ImageError::Malformed)?;

    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphabetic()) || payload.is_empty() {
        return Err(ImageError::Malformed);
    }

    let bytes = B64.decode(payload).map_err(|_| ImageError::Malformed)?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge { size: bytes.len() });
    }

    Ok((ext.to_ascii_lowercase(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_url(ext: &str, bytes: &[u8]) -> String {
        format!("data:image/{};base64,{}", ext, B64.encode(bytes))
    }

    #[test]
    fn decodes_well_formed_images() {
        let (ext, bytes) = decode_data_url(&data_url("PNG", b"\x89PNG fake")).unwrap();
        assert_eq!(ext, "png");
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[test]
    fn rejects_non_image_payloads() {
        for bad in [
            "",
            "hello",
            "data:text/plain;base64,aGk=",
            "data:image/png,aGk=",
            "data:image/;base64,aGk=",
            "data:image/sv+g;base64,aGk=",
            "data:image/png;base64,",
            "data:image/png;base64,!!!not base64!!!",
        ] {
            assert!(
                matches!(decode_data_url(bad), Err(ImageError::Malformed)),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn enforces_the_size_ceiling() {
        let at_limit = vec![0u8; MAX_IMAGE_BYTES];
        assert!(decode_data_url(&data_url("gif", &at_limit)).is_ok());

        let over = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            decode_data_url(&data_url("gif", &over)),
            Err(ImageError::TooLarge { size }) if size == MAX_IMAGE_BYTES + 1
        ));
    }

    #[tokio::test]
    async fn save_then_remove() {
        let dir = std::env::temp_dir().join(format!("devtalk-images-{}", Uuid::new_v4()));
        let store = ImageStore::new(dir.clone()).await.unwrap();

        let url = store.save(&data_url("jpeg", b"jpeg bytes")).await.unwrap();
        assert!(url.starts_with("/uploads/") && url.ends_with(".jpeg"));
        let path = store.local_path(&url).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");

        store.remove_all(&[url]).await;
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn local_path_stays_inside_the_store() {
        let store = ImageStore {
            dir: PathBuf::from("/srv/uploads"),
        };
        assert_eq!(
            store.local_path("/uploads/a.png"),
            Some(PathBuf::from("/srv/uploads/a.png"))
        );
        assert_eq!(store.local_path("/uploads/../etc/passwd"), None);
        assert_eq!(store.local_path("/elsewhere/a.png"), None);
    }
}
