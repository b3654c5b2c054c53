//! The shared image-ingest unit of work.
//!
//! Both the Steam import engine and manual uploads feed raw bytes through
//! here. One call is one logical unit: validate, hash, dedup, decode,
//! write original + thumbnails, insert the row. Failures are never
//! partial; any file written before an error is removed before returning.
//!
//! The worker does not publish progress events. Callers own that.

use chrono::{DateTime, Utc};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::db::{DbPool, Game, InsertOutcome, NewScreenshot, Screenshot, ScreenshotSource};
use crate::format_detector;
use crate::library::{self, Library};
use crate::metadata_extractor::MetadataExtractor;
use crate::thumbnail_generator::{ThumbnailGenerator, ThumbnailSize};

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    pub source: ScreenshotSource,
    pub game_id: i64,
    pub claimed_filename: String,
    pub steam_screenshot_id: Option<String>,
    pub steam_description: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DuplicateId,
    DuplicateHash,
    DuplicateHashRaced,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::DuplicateId => "duplicate_id",
            SkipReason::DuplicateHash => "duplicate_hash",
            SkipReason::DuplicateHashRaced => "duplicate_hash_raced",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Completed { screenshot_id: i64 },
    Skipped { reason: SkipReason },
}

/// Per-item failures. The caller records these as `failed` and moves on.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("game {0} not found")]
    GameNotFound(i64),
}

#[derive(Clone)]
pub struct IngestWorker {
    pool: DbPool,
    library: Library,
    thumbnails: ThumbnailGenerator,
}

impl IngestWorker {
    pub fn new(pool: DbPool, library: Library, thumbnails: ThumbnailGenerator) -> Self {
        Self {
            pool,
            library,
            thumbnails,
        }
    }

    pub fn ingest(&self, req: &IngestRequest) -> Result<IngestOutcome, IngestError> {
        let kind = format_detector::sniff(&req.bytes).ok_or(IngestError::UnsupportedFormat)?;

        let file_hash = format!("{:x}", Sha256::digest(&req.bytes));

        let game = Game::find(&self.pool, req.game_id)
            .map_err(|e| IngestError::Storage(e.to_string()))?
            .ok_or(IngestError::GameNotFound(req.game_id))?;

        // Dedup: Steam id first, then content hash, both scoped to the game.
        if let Some(ref steam_id) = req.steam_screenshot_id {
            let exists = Screenshot::steam_id_exists(&self.pool, game.id, steam_id)
                .map_err(|e| IngestError::Storage(e.to_string()))?;
            if exists {
                debug!("Skipping {}: steam id already imported", steam_id);
                return Ok(IngestOutcome::Skipped {
                    reason: SkipReason::DuplicateId,
                });
            }
        }
        let existing = Screenshot::find_by_hash(&self.pool, game.id, &file_hash)
            .map_err(|e| IngestError::Storage(e.to_string()))?;
        if existing.is_some() {
            debug!("Skipping {}: content hash already present", req.claimed_filename);
            return Ok(IngestOutcome::Skipped {
                reason: SkipReason::DuplicateHash,
            });
        }

        let img = image::load_from_memory(&req.bytes)
            .map_err(|e| IngestError::Decode(e.to_string()))?;
        let (width, height) = (img.width() as i64, img.height() as i64);

        let metadata = MetadataExtractor::extract(&req.bytes);
        let taken_at = req.taken_at.or(metadata.taken_at);

        let filename = self.resolve_filename(&game.folder_name, &req.claimed_filename, kind, &file_hash);
        let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(&filename);

        // Everything written from here on must be cleaned up on failure.
        let mut written: Vec<PathBuf> = Vec::new();
        let result = self.write_and_insert(
            req, &game, &filename, stem, kind, &file_hash, width, height, taken_at,
            metadata.exif_json, &img, &mut written,
        );

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                for path in &written {
                    self.library.remove_file(path);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_and_insert(
        &self,
        req: &IngestRequest,
        game: &Game,
        filename: &str,
        stem: &str,
        kind: format_detector::ImageKind,
        file_hash: &str,
        width: i64,
        height: i64,
        taken_at: Option<DateTime<Utc>>,
        exif_json: Option<String>,
        img: &image::DynamicImage,
        written: &mut Vec<PathBuf>,
    ) -> Result<IngestOutcome, IngestError> {
        let original_path = self.library.original_path(&game.folder_name, filename);
        self.library.write_atomic(&original_path, &req.bytes)?;
        written.push(original_path.clone());

        let sm_path = self.library.thumb_path(&game.folder_name, stem, ThumbnailSize::Small.suffix());
        let sm_bytes = self
            .thumbnails
            .generate(img, ThumbnailSize::Small)
            .map_err(|e| IngestError::Decode(e.to_string()))?;
        self.library.write_atomic(&sm_path, &sm_bytes)?;
        written.push(sm_path.clone());

        let md_path = self.library.thumb_path(&game.folder_name, stem, ThumbnailSize::Medium.suffix());
        let md_bytes = self
            .thumbnails
            .generate(img, ThumbnailSize::Medium)
            .map_err(|e| IngestError::Decode(e.to_string()))?;
        self.library.write_atomic(&md_path, &md_bytes)?;
        written.push(md_path.clone());

        let new = NewScreenshot {
            game_id: game.id,
            filename: filename.to_string(),
            file_path: self.library.relative_path(&original_path),
            thumb_sm_path: Some(self.library.relative_path(&sm_path)),
            thumb_md_path: Some(self.library.relative_path(&md_path)),
            file_size: req.bytes.len() as i64,
            width: Some(width),
            height: Some(height),
            format: Some(kind.as_str().to_string()),
            taken_at,
            steam_screenshot_id: req.steam_screenshot_id.clone(),
            steam_description: req.steam_description.clone(),
            source: req.source,
            file_hash: file_hash.to_string(),
            exif_data: exif_json,
        };

        match Screenshot::create(&self.pool, &new)
            .map_err(|e| IngestError::Storage(e.to_string()))?
        {
            InsertOutcome::Inserted(screenshot_id) => {
                info!(
                    "Ingested {} into {} ({}x{}, {} bytes)",
                    filename,
                    game.folder_name,
                    width,
                    height,
                    req.bytes.len()
                );
                Ok(IngestOutcome::Completed { screenshot_id })
            }
            InsertOutcome::DuplicateRace => {
                // A concurrent writer beat us to the row; remove our files
                // and report the skip.
                for path in written.drain(..) {
                    self.library.remove_file(&path);
                }
                Ok(IngestOutcome::Skipped {
                    reason: SkipReason::DuplicateHashRaced,
                })
            }
        }
    }

    /// Sanitizes the claimed filename, forces the extension of the
    /// detected format, and resolves collisions inside the game folder
    /// with a content-hash suffix.
    fn resolve_filename(
        &self,
        folder_name: &str,
        claimed: &str,
        kind: format_detector::ImageKind,
        file_hash: &str,
    ) -> String {
        let sanitized = library::sanitize_filename(claimed);
        let stem = sanitized
            .rsplit_once('.')
            .map(|(s, _)| s)
            .unwrap_or(&sanitized);
        let desired = format!("{}.{}", stem, kind.extension());

        let game_dir = self.library.game_dir(folder_name);
        library::unique_filename(&game_dir, &desired, file_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_in_memory_pool;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        pool: DbPool,
        library: Library,
        worker: IngestWorker,
        game: Game,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = create_in_memory_pool().unwrap();
        let library = Library::new(dir.path());
        let worker = IngestWorker::new(pool.clone(), library.clone(), ThumbnailGenerator::new(85));
        let game = Game::create(&pool, "Half-Life 2", Some(220)).unwrap();
        Fixture {
            _dir: dir,
            pool,
            library,
            worker,
            game,
        }
    }

    fn jpeg_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn steam_request(f: &Fixture, bytes: Vec<u8>, steam_id: &str) -> IngestRequest {
        IngestRequest {
            bytes,
            source: ScreenshotSource::SteamImport,
            game_id: f.game.id,
            claimed_filename: format!("steam_{}.jpg", steam_id),
            steam_screenshot_id: Some(steam_id.to_string()),
            steam_description: None,
            taken_at: None,
        }
    }

    #[test]
    fn happy_path_writes_files_and_row() {
        let f = fixture();
        let req = steam_request(&f, jpeg_bytes(640, 480, 1), "s1");

        let outcome = f.worker.ingest(&req).unwrap();
        let IngestOutcome::Completed { screenshot_id } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };

        let shot = Screenshot::find(&f.pool, screenshot_id).unwrap().unwrap();
        assert_eq!(shot.width, Some(640));
        assert_eq!(shot.height, Some(480));
        assert_eq!(shot.format.as_deref(), Some("jpeg"));
        assert_eq!(shot.source, ScreenshotSource::SteamImport);

        // File/row parity: original and both thumbnails exist.
        assert!(f.library.absolute_path(&shot.file_path).exists());
        assert!(f
            .library
            .absolute_path(shot.thumb_sm_path.as_deref().unwrap())
            .exists());
        assert!(f
            .library
            .absolute_path(shot.thumb_md_path.as_deref().unwrap())
            .exists());
    }

    #[test]
    fn duplicate_steam_id_skips_before_decode() {
        let f = fixture();
        let bytes = jpeg_bytes(640, 480, 2);
        f.worker.ingest(&steam_request(&f, bytes, "s1")).unwrap();

        // Different bytes, same Steam id.
        let outcome = f
            .worker
            .ingest(&steam_request(&f, jpeg_bytes(640, 480, 3), "s1"))
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Skipped {
                reason: SkipReason::DuplicateId
            }
        );
    }

    #[test]
    fn duplicate_hash_skips_across_sources() {
        let f = fixture();
        let bytes = jpeg_bytes(640, 480, 4);

        // A manual upload with the same bytes already exists.
        let upload = IngestRequest {
            bytes: bytes.clone(),
            source: ScreenshotSource::Upload,
            game_id: f.game.id,
            claimed_filename: "foo.jpg".to_string(),
            steam_screenshot_id: None,
            steam_description: None,
            taken_at: None,
        };
        let IngestOutcome::Completed { screenshot_id } = f.worker.ingest(&upload).unwrap() else {
            panic!("upload should complete");
        };

        let outcome = f.worker.ingest(&steam_request(&f, bytes, "s9")).unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Skipped {
                reason: SkipReason::DuplicateHash
            }
        );

        // The existing row keeps its source.
        let existing = Screenshot::find(&f.pool, screenshot_id).unwrap().unwrap();
        assert_eq!(existing.source, ScreenshotSource::Upload);
    }

    #[test]
    fn unsupported_format_is_rejected_without_files() {
        let f = fixture();
        let req = IngestRequest {
            bytes: b"<html>not an image, definitely</html>".to_vec(),
            source: ScreenshotSource::Upload,
            game_id: f.game.id,
            claimed_filename: "fake.jpg".to_string(),
            steam_screenshot_id: None,
            steam_description: None,
            taken_at: None,
        };

        let err = f.worker.ingest(&req).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat));
        assert!(!f.library.game_dir(&f.game.folder_name).exists());
    }

    #[test]
    fn truncated_image_fails_and_leaves_no_files() {
        let f = fixture();
        let mut bytes = jpeg_bytes(640, 480, 5);
        bytes.truncate(64); // valid magic, broken body

        let err = f.worker.ingest(&steam_request(&f, bytes, "s1")).unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));

        // No row, no files.
        let (rows, total) = Screenshot::list_for_game(&f.pool, f.game.id, 10, 0).unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
        let game_dir = f.library.game_dir(&f.game.folder_name);
        if game_dir.exists() {
            assert_eq!(std::fs::read_dir(&game_dir).unwrap().count(), 0);
        }
    }

    #[test]
    fn filename_extension_follows_detected_format() {
        let f = fixture();
        let req = IngestRequest {
            bytes: png_bytes(320, 200),
            source: ScreenshotSource::SteamImport,
            game_id: f.game.id,
            // Steam CDN URLs often carry no meaningful extension.
            claimed_filename: "steam_777.jpg".to_string(),
            steam_screenshot_id: Some("777".to_string()),
            steam_description: None,
            taken_at: None,
        };

        let IngestOutcome::Completed { screenshot_id } = f.worker.ingest(&req).unwrap() else {
            panic!("expected completion");
        };
        let shot = Screenshot::find(&f.pool, screenshot_id).unwrap().unwrap();
        assert_eq!(shot.filename, "steam_777.png");
        assert_eq!(shot.format.as_deref(), Some("png"));
    }

    #[test]
    fn colliding_filenames_get_hash_suffix() {
        let f = fixture();

        let first = steam_request(&f, jpeg_bytes(64, 64, 6), "a");
        let mut second = steam_request(&f, jpeg_bytes(64, 64, 7), "b");
        second.claimed_filename = first.claimed_filename.clone();

        f.worker.ingest(&first).unwrap();
        let IngestOutcome::Completed { screenshot_id } = f.worker.ingest(&second).unwrap() else {
            panic!("expected completion");
        };

        let shot = Screenshot::find(&f.pool, screenshot_id).unwrap().unwrap();
        assert_ne!(shot.filename, "steam_a.jpg");
        assert!(shot.filename.starts_with("steam_a_"));
    }
}
