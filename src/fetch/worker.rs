//! Fetch worker - runs in separate thread(s)

use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{debug, error};

use super::ChapterSource;
use super::request::{FetchRequest, FetchResponse};
use crate::error::ReaderError;

pub(super) fn fetch_worker(
    source: Arc<dyn ChapterSource>,
    request_rx: Receiver<FetchRequest>,
    response_tx: Sender<FetchResponse>,
) {
    while let Ok(request) = request_rx.recv() {
        match request {
            FetchRequest::Chapter {
                id,
                chapter,
                position,
            } => {
                debug!("Fetching chapter {chapter} ({position:?}, request {})", id.0);
                let response = match source.fetch_pages(&chapter) {
                    Ok(pages) => FetchResponse::Pages {
                        id,
                        chapter,
                        position,
                        pages,
                    },
                    Err(err) => {
                        error!("Fetching chapter {chapter} failed: {err:#}");
                        let error = ReaderError::fetch(chapter.clone(), &err);
                        FetchResponse::Failed {
                            id,
                            chapter,
                            position,
                            error,
                        }
                    }
                };

                // Receiver gone means the session was torn down
                if response_tx.send(response).is_err() {
                    break;
                }
            }
            FetchRequest::Shutdown => break,
        }
    }
}
