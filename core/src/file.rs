//! File uploads and downloads.
//!
//! # Design
//! Uploads are `MultipartFile` parts carried on the request next to its
//! parameters; the transport writes them into a multipart body. A source is
//! read again on every dispatch, so a recovered upload resends the whole
//! file. Downloads are requested with `ResponseKind::File`: the transport
//! saves the body to the destination and reports the path on the
//! `HttpResponse`, which `DownloadedFile` hands to the response handler.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::call::FromResponse;
use crate::error::DecodeError;
use crate::http::HttpResponse;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Opens a fresh reader over a stream's content.
pub type OpenReader = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Where the bytes of an uploaded file come from.
#[derive(Clone)]
pub enum FileSource {
    Data(Bytes),
    Path(PathBuf),
    /// Reopened for every attempt.
    Stream(OpenReader),
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            FileSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            FileSource::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl PartialEq for FileSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FileSource::Data(a), FileSource::Data(b)) => a == b,
            (FileSource::Path(a), FileSource::Path(b)) => a == b,
            (FileSource::Stream(a), FileSource::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// One file part of a multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartFile {
    /// Form field name.
    pub name: String,
    pub file_name: String,
    pub mime_type: String,
    pub source: FileSource,
}

impl MultipartFile {
    pub fn data(name: impl Into<String>, file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(name, file_name, FileSource::Data(data.into()))
    }

    /// The part's file name is the path's last component.
    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, file_name, FileSource::Path(path))
    }

    pub fn stream<F, R>(name: impl Into<String>, file_name: impl Into<String>, open: F) -> Self
    where
        F: Fn() -> io::Result<R> + Send + Sync + 'static,
        R: Read + Send + 'static,
    {
        let open: OpenReader = Arc::new(move || open().map(|r| Box::new(r) as Box<dyn Read + Send>));
        Self::new(name, file_name, FileSource::Stream(open))
    }

    fn new(name: impl Into<String>, file_name: impl Into<String>, source: FileSource) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            source,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// The full content of the part. Blocks on file and stream IO.
    pub fn read_bytes(&self) -> io::Result<Bytes> {
        match &self.source {
            FileSource::Data(data) => Ok(data.clone()),
            FileSource::Path(path) => read_all(File::open(path)?),
            FileSource::Stream(open) => read_all(open()?),
        }
    }
}

fn read_all(mut reader: impl Read) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf.into())
}

/// Where the transport delivers a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResponseKind {
    /// In memory, as `HttpResponse::body`.
    #[default]
    Data,
    /// Written to this path; the body is left empty.
    File(PathBuf),
}

impl ResponseKind {
    pub fn destination(&self) -> Option<&Path> {
        match self {
            ResponseKind::Data => None,
            ResponseKind::File(path) => Some(path),
        }
    }
}

/// A response body the transport saved to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
}

impl FromResponse for DownloadedFile {
    fn from_response(response: &HttpResponse) -> Result<Self, DecodeError> {
        response
            .file
            .clone()
            .map(|path| DownloadedFile { path })
            .ok_or_else(|| DecodeError {
                expected: "file",
                message: "response body was not saved to a file".to_string(),
            })
    }
}
