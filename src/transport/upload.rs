//! HTTP frame uploader.
//!
//! Every upload is one `POST <url>` carrying a single multipart field named
//! `image` with the JPEG bytes, the generated file name and content type
//! `image/jpeg`.
//!
//! Outcomes:
//! - `Ok(receipt)` with a 2xx status: delivered
//! - `Ok(receipt)` with any other status: rejected by the server, body kept for logging
//! - `Err(..)`: transport failure (timeout, DNS, refused connection, I/O)
//!
//! Redirects are not followed; the frame goes to the configured URL or nowhere.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};
use url::Url;

/// Multipart field carrying the frame.
pub const IMAGE_FIELD_NAME: &str = "image";
/// Content type of the frame part.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";
/// Request timeout when none is configured.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

const LOG_BODY_LIMIT: usize = 256;
const MAX_RESPONSE_BODY: u64 = 64 * 1024;

/// Sink for encoded frames.
pub trait Uploader {
    /// Send `image` under the file name `name`.
    fn upload(&mut self, image: &[u8], name: &str) -> Result<UploadReceipt>;

    /// Destination, for log lines.
    fn endpoint(&self) -> &str;
}

impl<U: Uploader + ?Sized> Uploader for Box<U> {
    fn upload(&mut self, image: &[u8], name: &str) -> Result<UploadReceipt> {
        (**self).upload(image, name)
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

/// Response to a completed upload request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
}

impl UploadReceipt {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response body cut down for a single log line.
    pub fn body_excerpt(&self) -> String {
        let trimmed = self.body.trim();
        if trimmed.len() <= LOG_BODY_LIMIT {
            return trimmed.to_string();
        }
        let mut end = LOG_BODY_LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    }
}

#[derive(Clone, Debug)]
pub struct UploaderConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Check that `url` is an absolute http(s) URL with a host.
pub fn validate_endpoint_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).with_context(|| format!("parse upload url '{}'", url))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(anyhow!(
                "unsupported upload scheme '{}'; expected http or https",
                other
            ))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("upload url '{}' has no host", url));
    }
    Ok(parsed)
}

/// Uploader backed by a blocking `ureq` agent.
pub struct HttpUploader {
    url: String,
    agent: ureq::Agent,
}

impl HttpUploader {
    pub fn new(config: UploaderConfig) -> Result<Self> {
        validate_endpoint_url(&config.url)?;
        if config.timeout.is_zero() {
            return Err(anyhow!("upload timeout must be greater than zero"));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .redirects(0)
            .build();
        Ok(Self {
            url: config.url,
            agent,
        })
    }
}

impl Uploader for HttpUploader {
    fn upload(&mut self, image: &[u8], name: &str) -> Result<UploadReceipt> {
        let body = MultipartBody::single_file(IMAGE_FIELD_NAME, name, IMAGE_CONTENT_TYPE, image);
        let started = Instant::now();
        let result = self
            .agent
            .post(&self.url)
            .set("Content-Type", &body.content_type())
            .send_bytes(body.bytes());

        match result {
            Ok(response) => {
                let status = response.status();
                Ok(UploadReceipt {
                    status,
                    body: read_body(response),
                    elapsed: started.elapsed(),
                })
            }
            Err(ureq::Error::Status(status, response)) => Ok(UploadReceipt {
                status,
                body: read_body(response),
                elapsed: started.elapsed(),
            }),
            Err(ureq::Error::Transport(transport)) => Err(anyhow!(
                "upload to {} failed after {}ms: {}",
                self.url,
                started.elapsed().as_millis(),
                transport
            )),
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Read at most `MAX_RESPONSE_BODY` bytes of a response body.
///
/// The status decides the outcome, so a body that is cut short or fails to
/// read keeps whatever arrived.
fn read_body(response: ureq::Response) -> String {
    let mut raw = Vec::new();
    if let Err(err) = response
        .into_reader()
        .take(MAX_RESPONSE_BODY)
        .read_to_end(&mut raw)
    {
        log::debug!(
            "upload response body incomplete after {} bytes: {}",
            raw.len(),
            err
        );
    }
    String::from_utf8_lossy(&raw).into_owned()
}

/// A multipart/form-data request body.
#[derive(Clone, Debug)]
pub struct MultipartBody {
    boundary: String,
    bytes: Vec<u8>,
}

impl MultipartBody {
    /// Body with a single file part.
    pub fn single_file(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        let boundary = format!(
            "----------------motion-uplink-{:016x}{:016x}",
            rand::random::<u64>(),
            rand::random::<u64>()
        );
        let mut bytes = Vec::with_capacity(data.len() + 256);
        bytes.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        bytes.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                quote_param(field),
                quote_param(file_name)
            )
            .as_bytes(),
        );
        bytes.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        bytes.extend_from_slice(data);
        bytes.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        Self { boundary, bytes }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Escape a Content-Disposition parameter value.
fn quote_param(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| match c {
            '"' => "%22".to_string(),
            '\\' => "\\\\".to_string(),
            other => other.to_string(),
        })
        .collect()
}
