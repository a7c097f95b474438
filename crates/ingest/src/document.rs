/// One fetched page, file, issue thread or Slack conversation, before chunking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDocument {
    pub url: String,
    pub title: Option<String>,
    pub path: Option<String>,
    pub file_type: Option<String>,
    pub content: String,
}

impl SourceDocument {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self { url: url.into(), title: None, path: None, file_type: None, content: content.into() }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        if !title.trim().is_empty() {
            self.title = Some(title.trim().to_owned());
        }
        self
    }

    pub fn with_path(mut self, path: impl Into<String>, file_type: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self.file_type = Some(file_type.into());
        self
    }
}
