//! QR pairing artifact persisted for out-of-band retrieval.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Result;

/// Renders a QR challenge string into PNG bytes. Rendering itself is an
/// external collaborator; the session layer only manages the file.
pub trait QrRenderer: Send + Sync {
    fn render_png(&self, data: &str) -> anyhow::Result<Vec<u8>>;
}

/// The PNG file at a well-known path holding the current QR challenge.
///
/// Regenerated on every QR event; the stale file is removed before the fresh
/// one is written, so readers never see an outdated code.
pub struct QrArtifact {
    path: PathBuf,
}

impl QrArtifact {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the artifact with a render of the given challenge.
    pub async fn write(&self, renderer: &dyn QrRenderer, data: &str) -> Result<()> {
        let _ = tokio::fs::remove_file(&self.path).await;
        let png = renderer
            .render_png(data)
            .map_err(|e| crate::Error::message(format!("qr render failed: {e}")))?;
        tokio::fs::write(&self.path, png).await?;
        debug!(path = %self.path.display(), "qr artifact written");
        Ok(())
    }

    /// Remove the artifact, e.g. once the session is paired.
    pub async fn remove(&self) {
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}
