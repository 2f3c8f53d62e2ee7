//! Thumbnail service: deterministic square-fitted JPEG thumbnails with
//! stable on-disk names derived from the source path.

use image::imageops::FilterType;
use md5::{Digest, Md5};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::is_supported_image;

/// Default bounding-square side in pixels.
pub const THUMB_SIDE: u32 = 300;

/// JPEG quality (0.85 on the 0..1 scale).
const JPEG_QUALITY: u8 = 85;

pub struct ThumbnailService {
    dir: PathBuf,
    side: u32,
}

/// Stable thumbnail filename: `hex(md5(absolute_path)).jpg`.
pub fn thumb_name(abs_path: &Path) -> String {
    let mut hasher = Md5::new();
    hasher.update(abs_path.to_string_lossy().as_bytes());
    format!("{}.jpg", hex::encode(hasher.finalize()))
}

impl ThumbnailService {
    pub fn new(dir: PathBuf, side: u32) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, side })
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        is_supported_image(path)
    }

    fn target_path(&self, source: &Path) -> PathBuf {
        self.dir.join(thumb_name(source))
    }

    /// Create (or reuse) the thumbnail for `source`, returning its path. An
    /// existing nonempty file is reused without re-decoding the source.
    pub fn create(&self, source: &Path) -> Result<PathBuf> {
        let target = self.target_path(source);
        if let Ok(meta) = fs::metadata(&target) {
            if meta.len() > 0 {
                return Ok(target);
            }
        }

        let img = image::open(source)?;
        let thumb = img.resize(self.side, self.side, FilterType::Triangle);

        // Temp-sibling + rename so readers never observe a half-written file.
        let tmp = target.with_extension("jpg.part");
        {
            let mut out = std::io::BufWriter::new(fs::File::create(&tmp)?);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            thumb.to_rgb8().write_with_encoder(encoder)?;
        }
        fs::rename(&tmp, &target)?;
        Ok(target)
    }

    /// Remove the thumbnail for `source` if present.
    pub fn delete(&self, source: &Path) {
        let target = self.target_path(source);
        if let Err(e) = fs::remove_file(&target) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %target.display(), error = %e, "failed to delete thumbnail");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumb_name_is_stable_and_hex() {
        let a = thumb_name(Path::new("/photos/a.jpg"));
        let b = thumb_name(Path::new("/photos/a.jpg"));
        let c = thumb_name(Path::new("/photos/b.jpg"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".jpg"));
        assert_eq!(a.len(), 32 + 4);
        assert!(a[..32].chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_create_reuse_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = ThumbnailService::new(tmp.path().join("thumbs"), 64).unwrap();

        // 200x100 source: the thumbnail must fit in 64x64 preserving aspect.
        let source = tmp.path().join("wide.png");
        image::RgbImage::from_pixel(200, 100, image::Rgb([120, 30, 200]))
            .save(&source)
            .unwrap();

        let thumb = svc.create(&source).unwrap();
        assert!(thumb.exists());
        let decoded = image::open(&thumb).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 32);

        // Second create reuses the existing file.
        let mtime = fs::metadata(&thumb).unwrap().modified().unwrap();
        let again = svc.create(&source).unwrap();
        assert_eq!(again, thumb);
        assert_eq!(fs::metadata(&thumb).unwrap().modified().unwrap(), mtime);

        svc.delete(&source);
        assert!(!thumb.exists());
        // Deleting again is harmless.
        svc.delete(&source);
    }
}
