// Library loader trait - fetches the mapping library's script and stylesheet
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct LibraryAssets {
    pub script: Bytes,
    pub style: Bytes,
}

#[async_trait]
pub trait LibraryLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<LibraryAssets>;
}
