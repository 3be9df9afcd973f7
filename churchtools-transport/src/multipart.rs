use bytes::Bytes;

/// A `multipart/form-data` payload.
///
/// Kept independent of any HTTP library so a request carrying it can be
/// cloned and replayed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub content: PartContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartContent {
    Text(String),
    File {
        file_name: Option<String>,
        content_type: Option<String>,
        data: Bytes,
    },
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            content: PartContent::Text(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            content: PartContent::File {
                file_name: Some(file_name.into()),
                content_type: None,
                data: data.into(),
            },
        });
        self
    }

    /// Like [`MultipartForm::file`] with an explicit MIME type.
    pub fn file_with_type(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            content: PartContent::File {
                file_name: Some(file_name.into()),
                content_type: Some(content_type.into()),
                data: data.into(),
            },
        });
        self
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
