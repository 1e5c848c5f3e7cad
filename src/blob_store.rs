use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("write to {path} rejected, blob changed since it was read")]
    Conflict { path: String },
    #[error("content store answered {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("malformed content store response: {0}")]
    Malformed(String),
}

/// A blob as read from the content store, with the revision token that a
/// following write must present.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    pub content: Vec<u8>,
    pub revision: String,
}

/// A store of named blobs with conditional writes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// `Ok(None)` when nothing exists at `path` yet.
    async fn get(&self, path: &str) -> Result<Option<Blob>, BlobError>;

    /// Writes `content` to `path`. With `revision` set, the write only
    /// succeeds if the blob is still at that revision; without it, only if
    /// the blob does not exist yet.
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&str>,
        commit_message: &str,
    ) -> Result<(), BlobError>;
}

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

const GITHUB_JSON: &str = "application/vnd.github+json";
const RAW_JSON: &str = "application/vnd.github.raw+json";

/// Files in a GitHub repository, accessed through the REST "contents" API.
/// The file's blob `sha` is the revision token.
pub struct GitHubContents {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    branch: String,
    token: String,
}

impl GitHubContents {
    pub fn new(api_url: &str, owner: &str, repo: &str, branch: &str, token: &str) -> Self {
        GitHubContents {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            token: token.to_string(),
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn blob_url(&self, sha: &str) -> String {
        format!(
            "{}/repos/{}/{}/git/blobs/{}",
            self.api_url, self.owner, self.repo, sha
        )
    }

    fn request(&self, method: Method, url: &str, accept: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(USER_AGENT, "chat-relay")
            .header(ACCEPT, accept)
    }

    // Files over 1 MB come back from the contents API without content. The
    // git blob with the same sha holds exactly the bytes of that revision.
    async fn fetch_raw_blob(&self, sha: &str) -> Result<Vec<u8>, BlobError> {
        let response = self
            .request(Method::GET, &self.blob_url(sha), RAW_JSON)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BlobError::UnexpectedStatus {
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

// GitHub wraps base64 content at 60 columns.
fn decode_content(encoding: Option<&str>, content: &str) -> Result<Vec<u8>, BlobError> {
    if let Some(other) = encoding.filter(|e| *e != "base64") {
        return Err(BlobError::Malformed(format!(
            "unsupported content encoding `{other}`"
        )));
    }

    let compact: String = content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    STANDARD
        .decode(compact)
        .map_err(|e| BlobError::Malformed(e.to_string()))
}

#[async_trait]
impl BlobStore for GitHubContents {
    async fn get(&self, path: &str) -> Result<Option<Blob>, BlobError> {
        let url = self.contents_url(path);
        let response = self
            .request(Method::GET, &url, GITHUB_JSON)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.json::<ContentsResponse>().await?;
                let content = match body.encoding.as_deref() {
                    Some("none") => self.fetch_raw_blob(&body.sha).await?,
                    encoding => decode_content(encoding, body.content.as_deref().unwrap_or(""))?,
                };
                debug!(path, revision = %body.sha, bytes = content.len(), "fetched blob");
                Ok(Some(Blob {
                    content,
                    revision: body.sha,
                }))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(BlobError::UnexpectedStatus {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&str>,
        commit_message: &str,
    ) -> Result<(), BlobError> {
        let url = self.contents_url(path);
        let body = UpdateRequest {
            message: commit_message,
            content: STANDARD.encode(content),
            branch: &self.branch,
            sha: revision,
        };

        let response = self
            .request(Method::PUT, &url, GITHUB_JSON)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(path, ?revision, "wrote blob");
            return Ok(());
        }

        match status {
            // 409 on a stale sha, 422 when a sha was expected but missing
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(BlobError::Conflict {
                    path: path.to_string(),
                })
            }
            _ => Err(BlobError::UnexpectedStatus {
                status,
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
