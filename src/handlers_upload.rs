//! Manual upload endpoint. Files go through the same ingest worker as
//! the Steam import, with progress streamed over SSE per upload task.

use bytes::Buf;
use futures_util::TryStreamExt;
use log::{error, info};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use uuid::Uuid;
use warp::multipart::{FormData, Part};
use warp::{Rejection, Reply};

use crate::db::{DbPool, Game, ScreenshotSource};
use crate::ingest_worker::{IngestOutcome, IngestRequest, IngestWorker};
use crate::progress_bus::{BusEvent, ProgressBus};
use crate::warp_helpers::ApiError;

/// Progress events for one upload task. `complete` is terminal and
/// closes the stream.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Status {
        message: String,
    },
    Start {
        total_files: usize,
        game_name: String,
    },
    FileStart {
        file_index: usize,
        filename: String,
    },
    FileComplete {
        file_index: usize,
        filename: String,
        screenshot_id: i64,
    },
    FileSkipped {
        file_index: usize,
        filename: String,
        reason: String,
    },
    FileError {
        file_index: usize,
        filename: String,
        error: String,
    },
    Complete {
        total_processed: usize,
        total_files: usize,
    },
}

impl BusEvent for UploadEvent {
    fn kind(&self) -> &'static str {
        match self {
            UploadEvent::Status { .. } => "status",
            UploadEvent::Start { .. } => "start",
            UploadEvent::FileStart { .. } => "file_start",
            UploadEvent::FileComplete { .. } => "file_complete",
            UploadEvent::FileSkipped { .. } => "file_skipped",
            UploadEvent::FileError { .. } => "file_error",
            UploadEvent::Complete { .. } => "complete",
        }
    }

    fn payload_json(&self) -> String {
        let value = match self {
            UploadEvent::Status { message } => json!({ "message": message }),
            UploadEvent::Start {
                total_files,
                game_name,
            } => json!({ "total_files": total_files, "game_name": game_name }),
            UploadEvent::FileStart {
                file_index,
                filename,
            } => json!({ "file_index": file_index, "filename": filename }),
            UploadEvent::FileComplete {
                file_index,
                filename,
                screenshot_id,
            } => json!({
                "file_index": file_index,
                "filename": filename,
                "screenshot_id": screenshot_id,
            }),
            UploadEvent::FileSkipped {
                file_index,
                filename,
                reason,
            } => json!({ "file_index": file_index, "filename": filename, "reason": reason }),
            UploadEvent::FileError {
                file_index,
                filename,
                error,
            } => json!({ "file_index": file_index, "filename": filename, "error": error }),
            UploadEvent::Complete {
                total_processed,
                total_files,
            } => json!({ "total_processed": total_processed, "total_files": total_files }),
        };
        value.to_string()
    }

    fn is_terminal(&self) -> bool {
        matches!(self, UploadEvent::Complete { .. })
    }

    fn is_done(&self) -> bool {
        matches!(self, UploadEvent::Complete { .. })
    }

    fn lag_marker(dropped: u64) -> Self {
        UploadEvent::Status {
            message: format!("{} progress events dropped for slow subscriber", dropped),
        }
    }
}

pub type UploadBus = ProgressBus<UploadEvent>;

/// POST /api/upload — multipart form with `game_id` and `files`.
/// Returns `{task_id}` immediately; ingestion runs in the background.
pub async fn upload(
    form: FormData,
    ingest: IngestWorker,
    db_pool: DbPool,
    bus: Arc<UploadBus>,
) -> Result<impl Reply, Rejection> {
    let (game_id, files) = collect_form(form).await.map_err(ApiError::validation)?;

    let game_id =
        game_id.ok_or_else(|| ApiError::validation("game_id field is required"))?;
    if files.is_empty() {
        return Err(ApiError::validation("no files provided"));
    }

    let game = match Game::find(&db_pool, game_id) {
        Ok(Some(game)) => game,
        Ok(None) => return Err(ApiError::not_found("game")),
        Err(e) => return Err(ApiError::database(e)),
    };

    let task_id = Uuid::new_v4().to_string();
    info!(
        "Upload task {} started: {} files for {}",
        task_id,
        files.len(),
        game.name
    );

    {
        let task_id = task_id.clone();
        tokio::spawn(async move {
            process_upload(&task_id, game, files, ingest, db_pool, bus).await;
        });
    }

    Ok(warp::reply::json(&json!({ "task_id": task_id })))
}

/// GET /api/upload/progress/{task_id} — SSE stream for an upload task.
pub async fn upload_progress(
    task_id: String,
    bus: Arc<UploadBus>,
) -> Result<impl Reply, Rejection> {
    let subscription = bus.subscribe(&task_id);
    let stream = futures_util::stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        let sse_event = warp::sse::Event::default()
            .id(event.seq.to_string())
            .event(event.event.kind())
            .data(event.event.payload_json());
        Some((Ok::<_, Infallible>(sse_event), sub))
    });

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}

async fn collect_form(
    mut form: FormData,
) -> Result<(Option<i64>, Vec<(String, Vec<u8>)>), String> {
    let mut game_id = None;
    let mut files = Vec::new();

    while let Some(part) = form.try_next().await.map_err(|e| e.to_string())? {
        let name = part.name().to_string();
        match name.as_str() {
            "game_id" => {
                let bytes = part_bytes(part).await?;
                let text = String::from_utf8_lossy(&bytes).into_owned();
                game_id = Some(
                    text.trim()
                        .parse::<i64>()
                        .map_err(|_| format!("invalid game_id: {}", text))?,
                );
            }
            "files" => {
                let filename = part
                    .filename()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unnamed".to_string());
                let bytes = part_bytes(part).await?;
                files.push((filename, bytes));
            }
            other => {
                log::debug!("Ignoring unknown multipart field {:?}", other);
            }
        }
    }

    Ok((game_id, files))
}

async fn part_bytes(part: Part) -> Result<Vec<u8>, String> {
    part.stream()
        .try_fold(Vec::new(), |mut acc, mut buf| async move {
            while buf.has_remaining() {
                let chunk = buf.chunk();
                acc.extend_from_slice(chunk);
                let len = chunk.len();
                buf.advance(len);
            }
            Ok(acc)
        })
        .await
        .map_err(|e| e.to_string())
}

async fn process_upload(
    task_id: &str,
    game: Game,
    files: Vec<(String, Vec<u8>)>,
    ingest: IngestWorker,
    db_pool: DbPool,
    bus: Arc<UploadBus>,
) {
    let total_files = files.len();
    bus.publish(
        task_id,
        UploadEvent::Start {
            total_files,
            game_name: game.name.clone(),
        },
    );

    let mut total_processed = 0;
    for (file_index, (filename, bytes)) in files.into_iter().enumerate() {
        bus.publish(
            task_id,
            UploadEvent::FileStart {
                file_index,
                filename: filename.clone(),
            },
        );

        let request = IngestRequest {
            bytes,
            source: ScreenshotSource::Upload,
            game_id: game.id,
            claimed_filename: filename.clone(),
            steam_screenshot_id: None,
            steam_description: None,
            taken_at: None,
        };

        let worker = ingest.clone();
        let outcome = tokio::task::spawn_blocking(move || worker.ingest(&request)).await;

        let event = match outcome {
            Ok(Ok(IngestOutcome::Completed { screenshot_id })) => {
                total_processed += 1;
                UploadEvent::FileComplete {
                    file_index,
                    filename,
                    screenshot_id,
                }
            }
            Ok(Ok(IngestOutcome::Skipped { reason })) => UploadEvent::FileSkipped {
                file_index,
                filename,
                reason: reason.as_str().to_string(),
            },
            Ok(Err(e)) => UploadEvent::FileError {
                file_index,
                filename,
                error: e.to_string(),
            },
            Err(join_err) => {
                error!("Upload ingest task panicked: {}", join_err);
                UploadEvent::FileError {
                    file_index,
                    filename,
                    error: "internal error".to_string(),
                }
            }
        };
        bus.publish(task_id, event);
    }

    if let Err(e) = Game::update_screenshot_stats(&db_pool, game.id) {
        error!("Failed to update stats for game {}: {}", game.id, e);
    }

    bus.publish(
        task_id,
        UploadEvent::Complete {
            total_processed,
            total_files,
        },
    );
}
