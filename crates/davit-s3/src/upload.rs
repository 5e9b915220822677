//! Server-side streaming multipart upload
//!
//! Consumes a request body as a stream and feeds it to the object store
//! in fixed-size parts with bounded memory: at most `queue_depth` part
//! buffers are resident at once, uploading concurrently while the
//! producer fills the next buffer. The final (possibly short) part
//! carries whatever remains; bodies that never fill a single part are
//! written with one plain PutObject, which also covers the zero-byte
//! case (object stores reject empty multipart completes).

use crate::driver::{PutResult, S3Driver};
use bytes::{Bytes, BytesMut};
use davit_common::{Error, Result};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct StreamUploadConfig {
    /// Size of non-final parts. 5 MiB is the S3 minimum.
    pub part_size: usize,
    /// Concurrently in-flight parts; the memory bound is
    /// `queue_depth * part_size`.
    pub queue_depth: usize,
    /// Remaining capacity budget, when the storage config caps usage.
    pub capacity: Option<CapacityBudget>,
}

impl Default for StreamUploadConfig {
    fn default() -> Self {
        Self {
            part_size: 5 * 1024 * 1024,
            queue_depth: 2,
            capacity: None,
        }
    }
}

/// Usage snapshot taken before the upload for capacity enforcement.
#[derive(Debug, Clone, Copy)]
pub struct CapacityBudget {
    pub used: u64,
    pub capacity: u64,
}

impl CapacityBudget {
    /// Bytes this upload may still write.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    fn exceeded_by(&self, written: u64) -> Option<Error> {
        if written > self.remaining() {
            Some(Error::CapacityExhausted {
                used: self.used,
                capacity: self.capacity,
                requested: written,
            })
        } else {
            None
        }
    }
}

/// Outcome of a completed streaming upload.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub etag: Option<String>,
    pub size: u64,
    pub parts: usize,
}

/// Aborts the multipart session unless disarmed. Covers both the error
/// paths below and request cancellation (the handler future being
/// dropped mid-stream).
struct AbortGuard {
    driver: S3Driver,
    key: String,
    upload_id: Option<String>,
    armed: bool,
}

impl AbortGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(upload_id) = self.upload_id.take() {
            let driver = self.driver.clone();
            let key = self.key.clone();
            tokio::spawn(async move {
                if let Err(e) = driver.multipart_abort(&key, &upload_id).await {
                    warn!(key, upload_id, "failed to abort multipart upload: {e}");
                }
            });
        }
    }
}

/// The sizes of the parts a body of `total` bytes splits into.
#[must_use]
pub fn part_layout(total: u64, part_size: u64) -> Vec<u64> {
    if total == 0 || part_size == 0 {
        return Vec::new();
    }
    let full = total / part_size;
    let rest = total % part_size;
    let mut layout = vec![part_size; full as usize];
    if rest > 0 {
        layout.push(rest);
    }
    layout
}

/// Stream a request body into the object store.
///
/// Returns once the object is durably committed. Any failure (stream
/// error, part failure past its retry budget, capacity exhaustion)
/// aborts the multipart session before the error propagates.
pub async fn upload_stream<S, E>(
    driver: &S3Driver,
    key: &str,
    content_type: &str,
    mut stream: S,
    config: &StreamUploadConfig,
) -> Result<CompletedUpload>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut guard = AbortGuard {
        driver: driver.clone(),
        key: key.to_string(),
        upload_id: None,
        armed: true,
    };
    let semaphore = Arc::new(Semaphore::new(config.queue_depth.max(1)));
    let mut tasks: JoinSet<Result<(i32, String)>> = JoinSet::new();
    let mut parts: Vec<(i32, String)> = Vec::new();
    let mut buffer = BytesMut::with_capacity(config.part_size);
    let mut next_part_number: i32 = 1;
    let mut total_bytes: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::internal(format!("request body error: {e}")))?;
        total_bytes += chunk.len() as u64;
        if let Some(budget) = &config.capacity {
            if let Some(e) = budget.exceeded_by(total_bytes) {
                return Err(e);
            }
        }
        buffer.extend_from_slice(&chunk);

        while buffer.len() >= config.part_size {
            let part = buffer.split_to(config.part_size).freeze();
            let upload_id = match &guard.upload_id {
                Some(id) => id.clone(),
                None => {
                    let id = driver.multipart_init(key, content_type).await?;
                    debug!(key, upload_id = %id, "opened streaming multipart upload");
                    guard.upload_id = Some(id.clone());
                    id
                }
            };
            drain_finished(&mut tasks, &mut parts)?;
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::internal("upload semaphore closed"))?;
            let task_driver = driver.clone();
            let task_key = key.to_string();
            let part_number = next_part_number;
            next_part_number += 1;
            tasks.spawn(async move {
                let _permit = permit;
                let etag = task_driver
                    .multipart_part(&task_key, &upload_id, part_number, part)
                    .await?;
                Ok((part_number, etag))
            });
        }
    }

    // EOF. Bodies that never filled one part take the direct path.
    let Some(upload_id) = guard.upload_id.clone() else {
        let result = driver.put(key, buffer.freeze(), content_type).await?;
        guard.disarm();
        return Ok(CompletedUpload {
            etag: result.etag,
            size: total_bytes,
            parts: 0,
        });
    };

    if !buffer.is_empty() {
        let part_number = next_part_number;
        let etag = driver
            .multipart_part(key, &upload_id, part_number, buffer.freeze())
            .await?;
        parts.push((part_number, etag));
    }

    while let Some(joined) = tasks.join_next().await {
        let part = joined.map_err(|e| Error::internal(format!("part task failed: {e}")))??;
        parts.push(part);
    }
    parts.sort_by_key(|(number, _)| *number);

    let part_count = parts.len();
    let result: PutResult = driver.multipart_complete(key, &upload_id, &parts).await?;
    guard.disarm();
    debug!(key, parts = part_count, size = total_bytes, "streaming upload complete");
    Ok(CompletedUpload {
        etag: result.etag,
        size: total_bytes,
        parts: part_count,
    })
}

fn drain_finished(
    tasks: &mut JoinSet<Result<(i32, String)>>,
    parts: &mut Vec<(i32, String)>,
) -> Result<()> {
    while let Some(joined) = tasks.try_join_next() {
        let part = joined.map_err(|e| Error::internal(format!("part task failed: {e}")))??;
        parts.push(part);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_part_layout_exact_multiple() {
        assert_eq!(part_layout(10 * MIB, 5 * MIB), vec![5 * MIB, 5 * MIB]);
    }

    #[test]
    fn test_part_layout_short_tail() {
        let layout = part_layout(42 * MIB, 5 * MIB);
        assert_eq!(layout.len(), 9);
        assert_eq!(layout[..8], vec![5 * MIB; 8][..]);
        assert_eq!(layout[8], 2 * MIB);
    }

    #[test]
    fn test_part_layout_single_short_body() {
        assert_eq!(part_layout(3 * MIB, 5 * MIB), vec![3 * MIB]);
        assert_eq!(part_layout(0, 5 * MIB), Vec::<u64>::new());
    }

    #[test]
    fn test_capacity_budget() {
        let budget = CapacityBudget {
            used: 40,
            capacity: 100,
        };
        assert_eq!(budget.remaining(), 60);
        assert!(budget.exceeded_by(60).is_none());
        let err = budget.exceeded_by(70).unwrap();
        assert!(matches!(
            err,
            Error::CapacityExhausted {
                used: 40,
                capacity: 100,
                requested: 70
            }
        ));
    }

    #[test]
    fn test_capacity_budget_overfull() {
        let budget = CapacityBudget {
            used: 150,
            capacity: 100,
        };
        assert_eq!(budget.remaining(), 0);
        assert!(budget.exceeded_by(1).is_some());
    }
}
