use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::blob_store::{Blob, BlobError, BlobStore};

/// In-process `BlobStore` that enforces revisions the way GitHub does.
#[derive(Default)]
pub struct FakeBlobs {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    blob: Option<Blob>,
    revisions: u32,
    // Commits made by "another writer" right after the next reads.
    interlopers: VecDeque<Vec<u8>>,
    unavailable: bool,
    puts: usize,
}

impl Inner {
    fn commit(&mut self, content: Vec<u8>) {
        self.revisions += 1;
        self.blob = Some(Blob {
            content,
            revision: format!("rev-{}", self.revisions),
        });
    }
}

impl FakeBlobs {
    pub fn with_content(content: &str) -> Self {
        let fake = FakeBlobs::default();
        fake.inner.lock().unwrap().commit(content.as_bytes().to_vec());
        fake
    }

    pub fn unavailable() -> Self {
        let fake = FakeBlobs::default();
        fake.inner.lock().unwrap().unavailable = true;
        fake
    }

    /// Another writer commits `content` between the next read and write.
    pub fn interleave_writer(&self, content: &str) {
        self.inner
            .lock()
            .unwrap()
            .interlopers
            .push_back(content.as_bytes().to_vec());
    }

    pub fn content(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .blob
            .as_ref()
            .map(|b| String::from_utf8(b.content.clone()).unwrap())
    }

    pub fn puts(&self) -> usize {
        self.inner.lock().unwrap().puts
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn get(&self, _path: &str) -> Result<Option<Blob>, BlobError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(BlobError::UnexpectedStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            });
        }

        let blob = inner.blob.clone();
        if let Some(content) = inner.interlopers.pop_front() {
            inner.commit(content);
        }
        Ok(blob)
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&str>,
        _commit_message: &str,
    ) -> Result<(), BlobError> {
        let mut inner = self.inner.lock().unwrap();
        inner.puts += 1;

        let current = inner.blob.as_ref().map(|b| b.revision.as_str()) == revision;
        if !current {
            return Err(BlobError::Conflict {
                path: path.to_string(),
            });
        }

        inner.commit(content.to_vec());
        Ok(())
    }
}
