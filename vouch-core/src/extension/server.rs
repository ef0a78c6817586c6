//! Extension side of the protocol
//!
//! Ecosystem adapters implement [`ExtensionHandler`] and hand it to
//! [`serve_stdio`]. The loop answers the handshake, dispatches requests and
//! turns handler failures into `Error` responses so the core never sees a
//! half-written frame.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use super::protocol::{
    read_message, write_message, FrameError, Request, Response, CAP_DESCRIBE, CAP_DISCOVER,
    PROTOCOL_VERSION,
};
use crate::package::{NameCase, PackageIdentity, PackageMetadata};

/// An ecosystem adapter
#[async_trait]
pub trait ExtensionHandler: Send + Sync {
    fn ecosystem_id(&self) -> &str;

    /// File-name globs identifying this ecosystem's manifests
    fn manifest_patterns(&self) -> Vec<String>;

    fn name_case(&self) -> NameCase {
        NameCase::Preserve
    }

    fn capabilities(&self) -> Vec<String> {
        vec![CAP_DISCOVER.to_string(), CAP_DESCRIBE.to_string()]
    }

    async fn discover(
        &self,
        root: &Path,
        manifests: &[PathBuf],
    ) -> anyhow::Result<Vec<PackageIdentity>>;

    async fn describe(&self, package: &PackageIdentity) -> anyhow::Result<PackageMetadata>;
}

/// Serve requests until `Shutdown` or the core closes the stream
pub async fn serve<H, R, W>(handler: &H, mut reader: R, mut writer: W) -> Result<(), FrameError>
where
    H: ExtensionHandler + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let request: Request = match read_message(&mut reader).await {
            Ok(request) => request,
            Err(FrameError::Closed) => {
                debug!("Core closed the stream");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let response = match request {
            Request::Handshake {
                protocol_version, ..
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "Core speaks protocol {}, this extension speaks {}",
                        protocol_version, PROTOCOL_VERSION
                    );
                }
                Response::Handshake {
                    protocol_version: PROTOCOL_VERSION,
                    ecosystem_id: handler.ecosystem_id().to_string(),
                    manifest_patterns: handler.manifest_patterns(),
                    capabilities: handler.capabilities(),
                    name_case: handler.name_case(),
                }
            }
            Request::Discover { root, manifests } => {
                match handler.discover(&root, &manifests).await {
                    Ok(packages) => Response::Discovered { packages },
                    Err(e) => error_response("discover_failed", e),
                }
            }
            Request::Describe { package } => match handler.describe(&package).await {
                Ok(metadata) => Response::Described { metadata },
                Err(e) => error_response("describe_failed", e),
            },
            Request::Shutdown => {
                write_message(&mut writer, &Response::Goodbye).await?;
                return Ok(());
            }
        };

        write_message(&mut writer, &response).await?;
    }
}

/// Serve on the process's stdin/stdout
pub async fn serve_stdio<H>(handler: &H) -> Result<(), FrameError>
where
    H: ExtensionHandler + ?Sized,
{
    serve(handler, tokio::io::stdin(), tokio::io::stdout()).await
}

fn error_response(code: &str, error: anyhow::Error) -> Response {
    warn!("{}: {:#}", code, error);
    Response::Error {
        code: code.to_string(),
        message: format!("{error:#}"),
    }
}
