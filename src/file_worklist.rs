use crate::batch::{SourceUnavailable, WorkItem, WorklistSource};
use async_trait::async_trait;
use std::path::PathBuf;

/// Worklist read from a newline-delimited file, one identifier per line.
///
/// Empty lines are blank items and keep their position.
pub struct FileWorklistSource {
    path: PathBuf,
}

impl FileWorklistSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl WorklistSource for FileWorklistSource {
    async fn read(&self) -> Result<Vec<WorkItem>, SourceUnavailable> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceUnavailable::new(format!("{:?}: {}", self.path, e)))?;

        Ok(content
            .lines()
            .enumerate()
            .map(|(position, line)| WorkItem::new(position, line.trim()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_lines_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ids.txt");
        std::fs::write(&path, "111\n\n333\r\n").unwrap();

        let items = FileWorklistSource::new(path).read().await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].identifier, "111");
        assert!(items[1].is_blank());
        assert_eq!(items[2].identifier, "333");
        assert_eq!(items[2].position, 2);
    }

    #[tokio::test]
    async fn test_empty_file_is_an_empty_worklist() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ids.txt");
        std::fs::write(&path, "").unwrap();

        assert!(FileWorklistSource::new(path).read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let source = FileWorklistSource::new(temp_dir.path().join("missing.txt"));
        assert!(source.read().await.is_err());
    }
}
