//! Script template rendering.
//!
//! Templates live under a fixed directory as `<name>.tmpl` and use
//! `{{ variable }}` markers. Rendering is all-or-nothing: the whole text is
//! produced in memory first, so a strict-mode failure never leaves a
//! half-rendered script on disk.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Error, Result};

/// Renders named templates from a fixed templates directory.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    templates_dir: PathBuf,
}

impl TemplateRenderer {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
        }
    }

    /// Render the template called `name`, substituting `vars`.
    ///
    /// In strict mode any `{{ variable }}` absent from `vars` is an
    /// [`Error::UndefinedVariable`] and nothing is written; in lenient mode
    /// it renders as the empty string.
    ///
    /// With an `output_path` the parent directories are created and the
    /// file is overwritten whole; without one a uniquely named scratch file
    /// is created. Returns the rendered text and the final path.
    pub fn render(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
        strict: bool,
        output_path: Option<&Path>,
    ) -> Result<(String, PathBuf)> {
        let template_path = self.templates_dir.join(format!("{name}.tmpl"));
        if !template_path.exists() {
            return Err(Error::TemplateNotFound(template_path));
        }

        let raw = std::fs::read_to_string(&template_path)
            .map_err(|e| Error::io(format!("read template {}", template_path.display()), e))?;

        let rendered = substitute(name, &raw, vars, strict)?;

        let final_path = match output_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::io(format!("create output directory {}", parent.display()), e)
                    })?;
                }
                std::fs::write(path, &rendered)
                    .map_err(|e| Error::io(format!("write rendered {}", path.display()), e))?;
                path.to_path_buf()
            }
            None => scratch_write(name, &rendered)?,
        };

        debug!(template = name, path = %final_path.display(), "rendered template");
        Ok((rendered, final_path))
    }
}

/// Substitute `{{ variable }}` markers in `text`.
///
/// An unterminated `{{` is passed through literally rather than treated as
/// a marker.
fn substitute(
    template_name: &str,
    text: &str,
    vars: &BTreeMap<String, String>,
    strict: bool,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let key = after[..end].trim();
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None if strict => {
                return Err(Error::UndefinedVariable {
                    template: template_name.to_string(),
                    variable: key.to_string(),
                });
            }
            None => {}
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Write `rendered` to a uniquely named scratch file suffixed with the
/// template's file name, and keep it past the process exit.
fn scratch_write(name: &str, rendered: &str) -> Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template".to_string());

    let (mut file, path) = tempfile::Builder::new()
        .prefix("flotilla_")
        .suffix(&format!("_{file_name}"))
        .tempfile()
        .map_err(|e| Error::io("create scratch file", e))?
        .keep()
        .map_err(|e| Error::io("persist scratch file", e.error))?;

    file.write_all(rendered.as_bytes())
        .map_err(|e| Error::io(format!("write scratch file {}", path.display()), e))?;
    Ok(path)
}
