use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, bail};
use log::debug;

use super::{RenderEngine, RenderJob};

/// Runs an external renderer program once per tile.
///
/// The program is called as
/// `<program> <args..> --style <file> --bbox <minx> <miny> <maxx> <maxy>
/// --size <width> <height> --output <png>` with its working directory set
/// to the job's data root, so relative resource paths in the style resolve
/// there. The style file is written next to the output and shares its
/// lifetime.
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Leading arguments passed before the per-tile ones.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl RenderEngine for CommandEngine {
    fn render(&self, job: &RenderJob<'_>, output: &Path) -> anyhow::Result<()> {
        let style_path = output.with_extension("xml");
        fs::write(&style_path, job.style.as_str())
            .with_context(|| format!("Failed to write style to {:?}", style_path))?;

        let envelope = job.envelope;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--style")
            .arg(&style_path)
            .arg("--bbox")
            .args([envelope.min_x, envelope.min_y, envelope.max_x, envelope.max_y].map(|v| v.to_string()))
            .arg("--size")
            .args([job.width.to_string(), job.height.to_string()])
            .arg("--output")
            .arg(output)
            .current_dir(job.data_root);

        debug!("Running renderer {:?}", command);
        let result = command
            .output()
            .with_context(|| format!("Failed to start renderer {:?}", self.program))?;

        if !result.status.success() {
            bail!(
                "renderer {:?} exited with {}: {}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        if !output.exists() {
            bail!("renderer {:?} did not write {:?}", self.program, output);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::envelope::GeoEnvelope;
    use crate::style::StyleResolver;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn style() -> crate::style::StyleDocument {
        StyleResolver::uncached()
            .render(NaiveDate::from_ymd_opt(2020, 6, 15).unwrap(), "<Map date=\"{{date}}\"/>")
            .unwrap()
    }

    fn envelope() -> GeoEnvelope {
        GeoEnvelope {
            min_x: -1.0,
            min_y: -2.0,
            max_x: 3.0,
            max_y: 4.0,
        }
    }

    #[test]
    fn test_passes_job_to_program() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let output = scratch.path().join("tile.png");
        let style = style();

        // $0 = "engine", then: --style FILE --bbox 4 values --size 2 values --output PNG
        let script = r#"{ cat "$2"; echo; echo "$4 $5 $6 $7 $9 ${10}"; pwd; } > "${12}""#;
        let engine = CommandEngine::new("sh").with_args(["-c", script, "engine"]);
        let job = RenderJob {
            width: 256,
            height: 128,
            style: &style,
            envelope: envelope(),
            data_root: data_root.path(),
        };

        engine.render(&job, &output).unwrap();

        let written = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "<Map date=\"2020-06-15\"/>");
        assert_eq!(lines[1], "-1 -2 3 4 256 128");
        let cwd = fs::canonicalize(lines[2]).unwrap();
        assert_eq!(cwd, fs::canonicalize(data_root.path()).unwrap());
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let style = style();
        let engine = CommandEngine::new("sh").with_args(["-c", "echo broken >&2; exit 3", "engine"]);
        let job = RenderJob {
            width: 256,
            height: 256,
            style: &style,
            envelope: envelope(),
            data_root: data_root.path(),
        };

        let err = engine.render(&job, &scratch.path().join("tile.png")).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_missing_output_is_error() {
        let data_root = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let style = style();
        let engine = CommandEngine::new("sh").with_args(["-c", "true", "engine"]);
        let job = RenderJob {
            width: 256,
            height: 256,
            style: &style,
            envelope: envelope(),
            data_root: data_root.path(),
        };

        assert!(engine.render(&job, &scratch.path().join("tile.png")).is_err());
    }
}
