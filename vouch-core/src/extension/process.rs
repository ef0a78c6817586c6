//! Extension subprocess client
//!
//! Each extension runs as a child process speaking the framed protocol on its
//! stdin/stdout. A session is taken out of its slot for the duration of a call
//! and only put back after a complete, valid response. Any failure, timeout or
//! cancellation drops the session, which kills the child (`kill_on_drop`), so
//! partial output can never leak into a later call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::protocol::{
    self, FrameError, Request, Response, CAP_DESCRIBE, CAP_DISCOVER, PROTOCOL_VERSION,
};
use crate::error::ExtensionError;
use crate::package::{NameCase, PackageIdentity, PackageMetadata};

/// Upper bound on identities accepted from one discover call
pub const MAX_DISCOVERED_PACKAGES: usize = 100_000;

/// Default per-call time budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How to launch an extension - its transport handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExtensionCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for ExtensionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What an extension told us about itself during the handshake
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionDescriptor {
    pub ecosystem_id: String,
    pub manifest_patterns: BTreeSet<String>,
    pub transport_handle: ExtensionCommand,
    pub capabilities: BTreeSet<String>,
    pub name_case: NameCase,
}

impl ExtensionDescriptor {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

struct Session {
    // Held for kill_on_drop
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

/// A registered extension process
pub struct ExtensionClient {
    descriptor: ExtensionDescriptor,
    timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl ExtensionClient {
    /// Spawn the extension and complete the handshake
    pub async fn start(
        command: ExtensionCommand,
        timeout: Duration,
    ) -> Result<Self, ExtensionError> {
        let (session, descriptor) = spawn_session(&command, timeout).await?;
        debug!(
            "Extension '{}' ready: ecosystem={}, patterns={:?}, capabilities={:?}",
            command, descriptor.ecosystem_id, descriptor.manifest_patterns, descriptor.capabilities
        );

        Ok(Self {
            descriptor,
            timeout,
            session: Mutex::new(Some(session)),
        })
    }

    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }

    pub fn ecosystem(&self) -> &str {
        &self.descriptor.ecosystem_id
    }

    /// Resolve dependencies declared by `manifests`
    pub async fn discover(
        &self,
        root: &Path,
        manifests: Vec<PathBuf>,
    ) -> Result<Vec<PackageIdentity>, ExtensionError> {
        self.require(CAP_DISCOVER)?;
        let request = Request::Discover {
            root: root.to_path_buf(),
            manifests,
        };

        match self.call(&request, "discover").await? {
            Response::Discovered { packages } => self.validate_packages(packages),
            other => Err(self.unexpected("discover", &other)),
        }
    }

    /// Look up registry metadata for one package
    pub async fn describe(
        &self,
        package: &PackageIdentity,
    ) -> Result<PackageMetadata, ExtensionError> {
        self.require(CAP_DESCRIBE)?;
        let request = Request::Describe {
            package: package.clone(),
        };

        match self.call(&request, "describe").await? {
            Response::Described { metadata } => Ok(metadata),
            other => Err(self.unexpected("describe", &other)),
        }
    }

    /// Ask the process to exit and reap it
    pub async fn shutdown(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };

        let exchange = async {
            protocol::write_message(&mut session.stdin, &Request::Shutdown).await?;
            protocol::read_message::<_, Response>(&mut session.stdout).await
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Response::Goodbye)) => debug!("Extension '{}' shut down", self.ecosystem()),
            _ => debug!(
                "Extension '{}' did not acknowledge shutdown; killing",
                self.ecosystem()
            ),
        }
        // Dropping the session kills the child if it is still running
    }

    fn require(&self, capability: &str) -> Result<(), ExtensionError> {
        if self.descriptor.supports(capability) {
            Ok(())
        } else {
            Err(ExtensionError::Unsupported {
                ecosystem: self.ecosystem().to_string(),
                capability: capability.to_string(),
            })
        }
    }

    /// One request/response exchange with timeout and session recovery
    async fn call(
        &self,
        request: &Request,
        operation: &'static str,
    ) -> Result<Response, ExtensionError> {
        let mut slot = self.session.lock().await;

        let mut session = match slot.take() {
            Some(session) => session,
            None => {
                debug!("Respawning extension '{}'", self.ecosystem());
                let (session, descriptor) =
                    spawn_session(&self.descriptor.transport_handle, self.timeout).await?;
                if descriptor.ecosystem_id != self.descriptor.ecosystem_id {
                    return Err(ExtensionError::Malformed {
                        ecosystem: self.ecosystem().to_string(),
                        reason: format!(
                            "respawned extension now claims ecosystem '{}'",
                            descriptor.ecosystem_id
                        ),
                    });
                }
                session
            }
        };

        let exchange = async {
            protocol::write_message(&mut session.stdin, request).await?;
            protocol::read_message::<_, Response>(&mut session.stdout).await
        };

        let response = match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => {
                warn!(
                    "Extension '{}' timed out during {}; terminating",
                    self.ecosystem(),
                    operation
                );
                return Err(ExtensionError::Timeout {
                    ecosystem: self.ecosystem().to_string(),
                    operation,
                    seconds: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) => return Err(frame_error(self.ecosystem(), e)),
            Ok(Ok(response)) => response,
        };

        // Only a complete exchange puts the session back
        *slot = Some(session);

        match response {
            Response::Error { code, message } => Err(ExtensionError::Remote {
                ecosystem: self.ecosystem().to_string(),
                code,
                message,
            }),
            response => Ok(response),
        }
    }

    fn validate_packages(
        &self,
        packages: Vec<PackageIdentity>,
    ) -> Result<Vec<PackageIdentity>, ExtensionError> {
        if packages.len() > MAX_DISCOVERED_PACKAGES {
            return Err(self.malformed(format!(
                "returned {} packages, limit is {MAX_DISCOVERED_PACKAGES}",
                packages.len()
            )));
        }

        let mut validated = Vec::with_capacity(packages.len());
        for package in packages {
            let normalized = package
                .renormalize(self.descriptor.name_case)
                .map_err(|reason| self.malformed(reason))?;
            if normalized.ecosystem != self.descriptor.ecosystem_id {
                return Err(self.malformed(format!(
                    "returned package {normalized} outside its ecosystem"
                )));
            }
            validated.push(normalized);
        }
        Ok(validated)
    }

    fn malformed(&self, reason: String) -> ExtensionError {
        ExtensionError::Malformed {
            ecosystem: self.ecosystem().to_string(),
            reason,
        }
    }

    fn unexpected(&self, operation: &str, response: &Response) -> ExtensionError {
        self.malformed(format!("unexpected response to {operation}: {response:?}"))
    }
}

fn frame_error(ecosystem: &str, error: FrameError) -> ExtensionError {
    match error {
        FrameError::Io(source) => ExtensionError::Io {
            ecosystem: ecosystem.to_string(),
            source,
        },
        other => ExtensionError::Malformed {
            ecosystem: ecosystem.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Spawn the process and run the handshake within `timeout`
async fn spawn_session(
    command: &ExtensionCommand,
    timeout: Duration,
) -> Result<(Session, ExtensionDescriptor), ExtensionError> {
    let label = command.to_string();

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExtensionError::Spawn {
            command: label.clone(),
            source,
        })?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(ExtensionError::Spawn {
            command: label,
            source: std::io::Error::other("child stdio was not captured"),
        });
    };

    // Forward extension diagnostics to our log
    if let Some(stderr) = child.stderr.take() {
        let label = label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "vouch::extension", "[{}] {}", label, line);
            }
        });
    }

    let mut session = Session {
        _child: child,
        stdin,
        stdout,
    };

    let handshake = async {
        protocol::write_message(
            &mut session.stdin,
            &Request::Handshake {
                protocol_version: PROTOCOL_VERSION,
                capabilities: vec![CAP_DISCOVER.to_string(), CAP_DESCRIBE.to_string()],
            },
        )
        .await?;
        protocol::read_message::<_, Response>(&mut session.stdout).await
    };

    let response = match tokio::time::timeout(timeout, handshake).await {
        Err(_) => {
            return Err(ExtensionError::Timeout {
                ecosystem: label,
                operation: "handshake",
                seconds: timeout.as_secs(),
            })
        }
        Ok(Err(e)) => return Err(frame_error(&label, e)),
        Ok(Ok(response)) => response,
    };

    match response {
        Response::Handshake {
            protocol_version,
            ecosystem_id,
            manifest_patterns,
            capabilities,
            name_case,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(ExtensionError::ProtocolMismatch {
                    command: label,
                    expected: PROTOCOL_VERSION,
                    found: protocol_version,
                });
            }

            let probe = PackageIdentity::new(ecosystem_id.clone(), "probe", "0");
            if let Err(reason) = probe.validate() {
                return Err(ExtensionError::Malformed {
                    ecosystem: label,
                    reason,
                });
            }
            for pattern in &manifest_patterns {
                if let Err(e) = glob::Pattern::new(pattern) {
                    return Err(ExtensionError::Malformed {
                        ecosystem: ecosystem_id,
                        reason: format!("invalid manifest pattern '{pattern}': {e}"),
                    });
                }
            }

            let descriptor = ExtensionDescriptor {
                ecosystem_id,
                manifest_patterns: manifest_patterns.into_iter().collect(),
                transport_handle: command.clone(),
                capabilities: capabilities.into_iter().collect(),
                name_case,
            };
            Ok((session, descriptor))
        }
        Response::Error { code, message } => Err(ExtensionError::Remote {
            ecosystem: label,
            code,
            message,
        }),
        other => Err(ExtensionError::Malformed {
            ecosystem: label,
            reason: format!("expected handshake, got {other:?}"),
        }),
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::time::Instant;

    /// Shell-scripted extension that emits `frames` in order, then waits for stdin to close
    pub(crate) fn scripted(frames: &[serde_json::Value], tail: &str) -> ExtensionCommand {
        let mut script = String::new();
        for frame in frames {
            let body = frame.to_string();
            assert!(!body.contains('\''), "scripted frames must not contain quotes");
            let len = (body.len() as u32).to_be_bytes();
            script.push_str(&format!(
                "printf '\\{:03o}\\{:03o}\\{:03o}\\{:03o}%s' '{}'; ",
                len[0], len[1], len[2], len[3], body
            ));
        }
        script.push_str(tail);
        ExtensionCommand::new("sh", vec!["-c".to_string(), script])
    }

    pub(crate) fn handshake(ecosystem: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "handshake",
            "protocol_version": PROTOCOL_VERSION,
            "ecosystem_id": ecosystem,
            "manifest_patterns": ["deps.txt"],
            "capabilities": ["discover"],
            "name_case": "lowercase"
        })
    }

    #[tokio::test]
    async fn test_handshake_and_discover() {
        let command = scripted(
            &[
                handshake("toy"),
                serde_json::json!({
                    "type": "discovered",
                    "packages": [{"ecosystem": "toy", "name": " Left-Pad ", "version": "1.3.0"}]
                }),
            ],
            "cat >/dev/null",
        );
        let client = ExtensionClient::start(command, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.ecosystem(), "toy");

        let packages = client.discover(Path::new("/tmp"), vec![]).await.unwrap();
        assert_eq!(packages, vec![PackageIdentity::new("toy", "left-pad", "1.3.0")]);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_protocol_version_mismatch() {
        let mut reply = handshake("toy");
        reply["protocol_version"] = serde_json::json!(99);
        let command = scripted(&[reply], "cat >/dev/null");

        let result = ExtensionClient::start(command, Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(ExtensionError::ProtocolMismatch { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_crash_during_handshake() {
        let command = ExtensionCommand::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        let result = ExtensionClient::start(command, Duration::from_secs(5)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = ExtensionCommand::new("/nonexistent/vouch-extension", vec![]);
        let result = ExtensionClient::start(command, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ExtensionError::Spawn { .. })));
    }

    /// Live and not merely an unreaped zombie
    fn is_running(pid: &str) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            return stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| !rest.starts_with('Z'));
        }
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[tokio::test]
    async fn test_discover_timeout_kills_the_process() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("extension.pid");
        let command = scripted(
            &[handshake("toy")],
            &format!("echo $$ > \"{}\"; exec sleep 30", pid_file.display()),
        );
        let client = ExtensionClient::start(command, Duration::from_secs(1))
            .await
            .unwrap();

        let started = Instant::now();
        let result = client.discover(Path::new("/tmp"), vec![]).await;
        assert!(matches!(result, Err(ExtensionError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(&pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(&pid), "extension process {pid} outlived its timeout");
    }

    #[tokio::test]
    async fn test_garbage_output_is_malformed() {
        let command = scripted(&[handshake("toy")], "printf 'garbage!'; cat >/dev/null");
        let client = ExtensionClient::start(command, Duration::from_secs(5))
            .await
            .unwrap();

        let result = client.discover(Path::new("/tmp"), vec![]).await;
        assert!(matches!(result, Err(ExtensionError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_foreign_ecosystem_identity_is_rejected() {
        let command = scripted(
            &[
                handshake("toy"),
                serde_json::json!({
                    "type": "discovered",
                    "packages": [{"ecosystem": "npm", "name": "d3", "version": "4.10.0"}]
                }),
            ],
            "cat >/dev/null",
        );
        let client = ExtensionClient::start(command, Duration::from_secs(5))
            .await
            .unwrap();

        let result = client.discover(Path::new("/tmp"), vec![]).await;
        assert!(matches!(result, Err(ExtensionError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_describe_requires_capability() {
        let command = scripted(&[handshake("toy")], "cat >/dev/null");
        let client = ExtensionClient::start(command, Duration::from_secs(5))
            .await
            .unwrap();

        let result = client
            .describe(&PackageIdentity::new("toy", "a", "1"))
            .await;
        assert!(matches!(result, Err(ExtensionError::Unsupported { .. })));
    }
}
