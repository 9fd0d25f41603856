//! SVG to PNG conversion through an external rasterizer process.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use image::ImageFormat;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::RenderError;
use crate::output::{replace, temp_sibling};

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Cap on captured stderr kept in error messages
const MAX_STDERR_CHARS: usize = 2048;

/// A parsed rasterizer command line.
///
/// Arguments are split on whitespace and run without a shell. `{input}`
/// becomes the SVG path and `{output}` the PNG path. Without `{input}` the
/// SVG is piped to stdin; without `{output}` stdout becomes the PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rasterizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Rasterizer {
    pub fn parse(command: &str, timeout: Duration) -> Result<Self, RenderError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| RenderError::InvalidCommand("command is empty".to_string()))?;
        if program.contains(INPUT_PLACEHOLDER) || program.contains(OUTPUT_PLACEHOLDER) {
            return Err(RenderError::InvalidCommand(format!(
                "program name cannot be a placeholder: {}",
                program
            )));
        }
        if timeout.is_zero() {
            return Err(RenderError::InvalidCommand("timeout must be positive".to_string()));
        }
        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn reads_stdin(&self) -> bool {
        !self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER))
    }

    fn writes_stdout(&self) -> bool {
        !self.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER))
    }

    fn expand(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }

    /// Convert `input` into `output`. The rasterizer writes to a temporary
    /// sibling which replaces `output` only after a clean exit.
    #[instrument(skip(self), fields(program = %self.program), level = "info")]
    pub async fn rasterize(&self, input: &Path, output: &Path) -> Result<(), RenderError> {
        let temp = temp_sibling(output);
        let result = self.run(input, &temp).await;
        match result {
            Ok(Some(stdout)) => {
                if let Err(e) = tokio::fs::write(&temp, &stdout).await {
                    let _ = tokio::fs::remove_file(&temp).await;
                    return Err(RenderError::write(output, e));
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        }
        replace(&temp, output).await
    }

    /// Run the process. Returns captured stdout when it is the image.
    async fn run(&self, input: &Path, target: &Path) -> Result<Option<Vec<u8>>, RenderError> {
        let svg = if self.reads_stdin() {
            Some(
                tokio::fs::read(input)
                    .await
                    .map_err(|e| RenderError::read(input, e))?,
            )
        } else {
            None
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(self.expand(input, target))
            .stdin(if svg.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RenderError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Feed stdin while stdout drains, or a streaming rasterizer fills its
        // output pipe and stops reading. Both sides count against the timeout.
        let stdin = child.stdin.take();
        let feed = async move {
            if let (Some(bytes), Some(mut stdin)) = (svg, stdin) {
                // The process may exit before reading everything; its status
                // says whether that mattered.
                let _ = stdin.write_all(&bytes).await;
            }
        };

        // On timeout the child is dropped, which kills it.
        let ((), output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| RenderError::RasterizeTimeout(self.timeout))?;
        let output = output.map_err(|source| RenderError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::RasterizeFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
            });
        }

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rasterizer finished"
        );
        Ok(self.writes_stdout().then_some(output.stdout))
    }
}

/// Re-encode a PNG as 8-bit grayscale in place.
#[instrument(level = "info")]
pub async fn to_grayscale(path: &Path) -> Result<(), RenderError> {
    let source = path.to_path_buf();
    let temp = temp_sibling(path);
    let target = temp.clone();

    let converted = tokio::task::spawn_blocking(move || -> Result<(u32, u32), RenderError> {
        let gray = image::open(&source)?.to_luma8();
        gray.save_with_format(&target, ImageFormat::Png)?;
        Ok(gray.dimensions())
    })
    .await
    .map_err(|e| RenderError::Join(e.to_string()))?;

    match converted {
        Ok((width, height)) => {
            replace(&temp, path).await?;
            info!(width, height, "Converted PNG to grayscale");
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};
    use tempfile::TempDir;

    const RSVG: &str = "rsvg-convert --background-color=white -o {output} {input}";

    fn fast(command: &str) -> Rasterizer {
        Rasterizer::parse(command, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_default_command() {
        let rasterizer = fast(RSVG);
        assert_eq!(rasterizer.program(), "rsvg-convert");
        assert!(!rasterizer.reads_stdin());
        assert!(!rasterizer.writes_stdout());
        assert_eq!(
            rasterizer.expand(Path::new("/o/output.svg"), Path::new("/o/output.png")),
            vec![
                "--background-color=white",
                "-o",
                "/o/output.png",
                "/o/output.svg"
            ]
        );
    }

    #[test]
    fn test_parse_rejects_bad_commands() {
        assert!(matches!(
            Rasterizer::parse("   ", Duration::from_secs(5)),
            Err(RenderError::InvalidCommand(_))
        ));
        assert!(matches!(
            Rasterizer::parse("{input} -o x", Duration::from_secs(5)),
            Err(RenderError::InvalidCommand(_))
        ));
        assert!(matches!(
            Rasterizer::parse("convert", Duration::ZERO),
            Err(RenderError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_embedded_placeholder_expands() {
        let rasterizer = fast("inkscape --export-filename={output} {input}");
        assert_eq!(
            rasterizer.expand(Path::new("in.svg"), Path::new("out.png")),
            vec!["--export-filename=out.png", "in.svg"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_mode() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("output.svg");
        let output = dir.path().join("output.png");
        tokio::fs::write(&input, b"<svg/>").await.unwrap();

        fast("cp {input} {output}")
            .rasterize(&input, &output)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"<svg/>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_stdout_mode() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("output.svg");
        let output = dir.path().join("output.png");
        tokio::fs::write(&input, b"<svg/>").await.unwrap();

        fast("cat").rasterize(&input, &output).await.unwrap();
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"<svg/>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_keeps_previous_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("output.svg");
        let output = dir.path().join("output.png");
        tokio::fs::write(&input, b"<svg/>").await.unwrap();
        tokio::fs::write(&output, b"previous").await.unwrap();

        let err = fast("ls {input}/missing").rasterize(&input, &output).await.unwrap_err();
        assert!(matches!(err, RenderError::RasterizeFailed { .. }));
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"previous");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("output.svg");
        tokio::fs::write(&input, b"<svg/>").await.unwrap();

        let rasterizer = Rasterizer::parse("sleep 5", Duration::from_millis(100)).unwrap();
        let err = rasterizer
            .rasterize(&input, &dir.path().join("output.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::RasterizeTimeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_larger_than_pipe_buffer() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("output.svg");
        let output = dir.path().join("output.png");
        let svg = vec![b'x'; 1024 * 1024];
        tokio::fs::write(&input, &svg).await.unwrap();

        let rasterizer = Rasterizer::parse("cat", Duration::from_secs(5)).unwrap();
        tokio::time::timeout(Duration::from_secs(10), rasterizer.rasterize(&input, &output))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tokio::fs::read(&output).await.unwrap(), svg);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("output.svg");
        tokio::fs::write(&input, b"<svg/>").await.unwrap();

        let err = fast("kwd-no-such-rasterizer {input} {output}")
            .rasterize(&input, &dir.path().join("output.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_grayscale_conversion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.png");
        let color: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(4, 3, Rgba([200, 30, 30, 255]));
        color.save_with_format(&path, ImageFormat::Png).unwrap();

        to_grayscale(&path).await.unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.color(), image::ColorType::L8);
        assert_eq!(reloaded.to_luma8().dimensions(), (4, 3));
    }

    #[tokio::test]
    async fn test_grayscale_rejects_non_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.png");
        tokio::fs::write(&path, b"not an image").await.unwrap();

        let err = to_grayscale(&path).await.unwrap_err();
        assert!(matches!(err, RenderError::Image(_)));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"not an image");
    }
}
