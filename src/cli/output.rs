//! CLI output: error mapping and event framing on the output stream.

use crate::error::{ApiError, ProviderError, StorageError};
use crate::generation::SseEvent;
use std::io::Write;
use tokio::sync::mpsc::Receiver;

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::Provider(ProviderError::Auth(_)) => format!(
            "{}\nCheck the api_key (or api_key_env) of the active provider.",
            e
        ),
        ApiError::ConfigError(_) => format!(
            "{}\nRun `notecraft providers` to see how providers resolve.",
            e
        ),
        _ => e.to_string(),
    }
}

/// Frame one event in the requested wire shape.
pub fn frame_event<E: SseEvent>(event: &E, format: &str) -> String {
    if format == "json" {
        let mut line = event.to_json_line();
        line.push('\n');
        line
    } else {
        event.to_sse()
    }
}

/// Write every event until the producer closes the stream.
///
/// A write failure stops reading; the receiver is dropped so the producer's sink
/// goes quiet while the run itself finishes.
pub async fn drain_events<E: SseEvent>(
    mut receiver: Receiver<E>,
    format: &str,
    out: &mut dyn Write,
) -> Result<usize, ApiError> {
    let mut written = 0;
    while let Some(event) = receiver.recv().await {
        out.write_all(frame_event(&event, format).as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| ApiError::StorageError(StorageError::IoError(e)))?;
        written += 1;
    }
    Ok(written)
}
