//! Session-scoped image state: one uploaded image per session, replaced
//! wholesale when a new upload with a different identity arrives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use hex;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::codec::{self, CodecError};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Maps an accepted upload file name to its mime type; `None` rejects.
pub fn mime_for_file_name(name: &str) -> Option<&'static str> {
    let (_, extension) = name.rsplit_once('.')?;
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Immutable decoded upload. The raw bytes feed the crop deployment in
/// their original format; `pixels` is the RGB-normalized decode.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub mime_type: String,
    pub content_hash: String,
    pub raw: Vec<u8>,
    pub pixels: DynamicImage,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedImage {
    pub fn from_upload(
        file_name: String,
        mime_type: String,
        raw: Vec<u8>,
    ) -> Result<Self, CodecError> {
        let pixels = codec::decode(&raw)?;
        let content_hash = content_hash(&raw);
        Ok(Self {
            file_name,
            mime_type,
            content_hash,
            raw,
            pixels,
            uploaded_at: Utc::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("unknown session")]
    NotFound,
    #[error("no image has been uploaded for this session")]
    NoImage,
    #[error("an analysis run is already in progress for this session")]
    RunInProgress,
}

#[derive(Default)]
struct Session {
    image: Option<UploadedImage>,
    running: bool,
}

/// Uuid-keyed session map. Uploads mutate the stored image; runs read a
/// cloned snapshot, so a re-upload never affects an in-flight run.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the upload, creating the session when needed. Returns the
    /// session id and whether a previously held image was replaced; an
    /// upload with the same content hash is a no-op.
    pub fn put_image(&self, session_id: Option<Uuid>, image: UploadedImage) -> (Uuid, bool) {
        let mut sessions = self.inner.lock().unwrap();
        let id = session_id.unwrap_or_else(Uuid::new_v4);
        let session = sessions.entry(id).or_default();
        let replaced = match &session.image {
            Some(current) if current.content_hash == image.content_hash => false,
            Some(_) => {
                session.image = Some(image);
                true
            }
            None => {
                session.image = Some(image);
                false
            }
        };
        (id, replaced)
    }

    /// Acquires the run guard and returns a snapshot of the session image.
    /// At most one run per session is ever active.
    pub fn begin_run(&self, session_id: Uuid) -> Result<UploadedImage, SessionError> {
        let mut sessions = self.inner.lock().unwrap();
        let session = sessions.get_mut(&session_id).ok_or(SessionError::NotFound)?;
        if session.running {
            return Err(SessionError::RunInProgress);
        }
        let image = session.image.clone().ok_or(SessionError::NoImage)?;
        session.running = true;
        Ok(image)
    }

    pub fn finish_run(&self, session_id: Uuid) {
        let mut sessions = self.inner.lock().unwrap();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.running = false;
        }
    }
}
