use super::new_id;

/// URL prefix of files stored by this client. Only these are resolved before
/// a request; any other URL is passed to the model untouched.
pub const INTERNAL_FILE_PREFIX: &str = "/api/files/";

const TEXTUAL_MEDIA_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/x-sh",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data,
        }
    }
}

/// A file the user picked that has not been uploaded yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    id: String,
    file: SourceFile,
}

impl Attachment {
    pub fn new(file: SourceFile) -> Self {
        Self {
            id: new_id("file"),
            file,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn media_type(&self) -> &str {
        &self.file.media_type
    }
}

/// Bytes of a stored file together with the media type it was served with.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFile {
    pub data: Vec<u8>,
    pub media_type: String,
}

/// Resolved content of a file reference, as kept in the session file cache.
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl From<RawFile> for FileContent {
    fn from(raw: RawFile) -> Self {
        if !is_textual(&raw.media_type) {
            return FileContent::Binary(raw.data);
        }
        match String::from_utf8(raw.data) {
            Ok(text) => FileContent::Text(text),
            Err(err) => FileContent::Binary(err.into_bytes()),
        }
    }
}

pub fn is_internal_file(url: &str) -> bool {
    url.starts_with(INTERNAL_FILE_PREFIX)
}

pub fn is_textual(media_type: &str) -> bool {
    let media_type = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type.starts_with("text/") || TEXTUAL_MEDIA_TYPES.contains(&media_type.as_str())
}

pub fn guess_media_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .to_string()
}
