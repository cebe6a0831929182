// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-engine image builds from Git sources.
//!
//! The build context is synthetic: a tar archive holding a single
//! generated `Dockerfile` that clones the repository and assembles the
//! app. The Engine streams JSON build events back; [`BuildStreamParser`]
//! is the state machine over that stream with three outcomes - success,
//! failure with the Engine's message, or stream end without a success
//! marker (also failure).

use serde::Deserialize;

use crate::error::{DriverError, Result};

/// Everything needed to render a build context for a Git source.
#[derive(Debug, Clone)]
pub struct GitBuildSpec {
    /// Base image, e.g. `node:20-alpine`.
    pub base_image: String,
    /// Repository URL to clone.
    pub git_url: String,
    /// Branch to clone.
    pub branch: String,
    /// Dependency install command, e.g. `yarn install`.
    pub install_command: Option<String>,
    /// Build command, e.g. `yarn build`.
    pub build_command: Option<String>,
    /// Start command; defaults to `yarn start`.
    pub start_command: Option<String>,
}

impl GitBuildSpec {
    /// Render the synthetic Dockerfile for this spec.
    ///
    /// The base distro's package manager is detected by the `alpine`
    /// substring convention. The image always runs as a non-root
    /// `appuser` and exposes port 3000.
    pub fn render_dockerfile(&self) -> String {
        let is_alpine = self.base_image.contains("alpine");

        let install_git = if is_alpine {
            "RUN apk add --no-cache git"
        } else {
            "RUN apt-get update && apt-get install -y --no-install-recommends git \\\n    && rm -rf /var/lib/apt/lists/*"
        };

        let create_user = if is_alpine {
            "RUN addgroup -S appuser && adduser -S appuser -G appuser"
        } else {
            "RUN groupadd --system appuser && useradd --system --gid appuser appuser"
        };

        let assemble = match (&self.install_command, &self.build_command) {
            (Some(install), Some(build)) => format!("RUN {install} && {build}"),
            (Some(install), None) => format!("RUN {install}"),
            (None, Some(build)) => format!("RUN {build}"),
            (None, None) => String::new(),
        };

        let cmd = render_cmd(self.start_command.as_deref());

        let mut lines = vec![
            format!("FROM {}", self.base_image),
            install_git.to_string(),
            "WORKDIR /app".to_string(),
            format!(
                "RUN git clone --branch {} --single-branch {} .",
                self.branch, self.git_url
            ),
        ];
        if !assemble.is_empty() {
            lines.push(assemble);
        }
        lines.push(create_user.to_string());
        lines.push("RUN chown -R appuser /app".to_string());
        lines.push("USER appuser".to_string());
        lines.push("EXPOSE 3000".to_string());
        lines.push(format!("CMD {cmd}"));

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Render a start command into Dockerfile argv form.
fn render_cmd(start_command: Option<&str>) -> String {
    let argv: Vec<&str> = match start_command {
        Some(cmd) if !cmd.trim().is_empty() => cmd.split_whitespace().collect(),
        _ => vec!["yarn", "start"],
    };
    let quoted: Vec<String> = argv
        .iter()
        .map(|part| format!("\"{}\"", part.replace('"', "\\\"")))
        .collect();
    format!("[{}]", quoted.join(","))
}

/// Build a tar archive holding a single `Dockerfile`.
///
/// The Engine only needs a POSIX ustar entry; the archive is assembled
/// by hand rather than pulling in an archive crate for one fixed file.
pub fn dockerfile_context(dockerfile: &str) -> Vec<u8> {
    let content = dockerfile.as_bytes();
    let mut header = [0u8; 512];

    header[..10].copy_from_slice(b"Dockerfile");
    write_octal(&mut header[100..108], 0o644, 7); // mode
    write_octal(&mut header[108..116], 0, 7); // uid
    write_octal(&mut header[116..124], 0, 7); // gid
    write_octal(&mut header[124..136], content.len() as u64, 11); // size
    write_octal(&mut header[136..148], 0, 11); // mtime
    header[148..156].fill(b' '); // checksum placeholder
    header[156] = b'0'; // regular file
    header[257..262].copy_from_slice(b"ustar");
    header[263..265].copy_from_slice(b"00");

    let checksum: u64 = header.iter().map(|&b| b as u64).sum();
    write_octal(&mut header[148..155], checksum, 6);
    header[155] = b' ';

    let padded_len = content.len().div_ceil(512) * 512;
    let mut archive = Vec::with_capacity(512 + padded_len + 1024);
    archive.extend_from_slice(&header);
    archive.extend_from_slice(content);
    archive.resize(512 + padded_len, 0);
    // End-of-archive marker.
    archive.resize(archive.len() + 1024, 0);
    archive
}

/// Write `value` as zero-padded octal with a trailing NUL.
fn write_octal(field: &mut [u8], value: u64, width: usize) {
    let text = format!("{value:0width$o}");
    field[..width].copy_from_slice(text.as_bytes());
    field[width] = 0;
}

/// One JSON line of the Engine build stream.
#[derive(Debug, Deserialize)]
struct BuildEvent {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Final report of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Whether the `Successfully tagged` marker was seen. Its absence
    /// is a warning, not a failure.
    pub tagged: bool,
}

/// State machine over the Engine build-event stream.
///
/// Feed raw chunks as they arrive; call [`BuildStreamParser::finish`]
/// at stream end. An explicit `error` event wins over everything; a
/// stream that ends without the `Successfully built` marker is a
/// failure even if no error event was seen.
#[derive(Debug, Default)]
pub struct BuildStreamParser {
    line_buf: String,
    saw_built: bool,
    saw_tagged: bool,
    error: Option<String>,
}

impl BuildStreamParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk of the build stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.line_buf.push_str(&String::from_utf8_lossy(chunk));
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            self.feed_line(line.trim());
        }
    }

    fn feed_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        let Ok(event) = serde_json::from_str::<BuildEvent>(line) else {
            tracing::debug!(line, "Unparseable build event line");
            return;
        };

        if let Some(stream) = &event.stream {
            if stream.contains("Successfully built") {
                self.saw_built = true;
            }
            if stream.contains("Successfully tagged") {
                self.saw_tagged = true;
            }
        }

        if event.error.is_some() || event.error_detail.is_some() {
            let message = event
                .error_detail
                .and_then(|d| d.message)
                .or(event.error)
                .unwrap_or_else(|| "build failed".to_string());
            // First error wins; later events cannot clear it.
            self.error.get_or_insert(message);
        }
    }

    /// Conclude the stream.
    pub fn finish(mut self) -> Result<BuildReport> {
        // A final unterminated line still counts.
        if !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            self.feed_line(line.trim());
        }

        if let Some(message) = self.error {
            return Err(DriverError::BuildFailed(message));
        }
        if !self.saw_built {
            return Err(DriverError::BuildFailed(
                "build stream ended without success marker".to_string(),
            ));
        }
        if !self.saw_tagged {
            tracing::warn!("Build succeeded but tag confirmation was not observed");
        }
        Ok(BuildReport {
            tagged: self.saw_tagged,
        })
    }
}
