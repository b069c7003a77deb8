use std::io::Write;
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::ingress::Ingress;

/// Every resource starts a new YAML document so rendered templates can be
/// concatenated and applied in bulk.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

#[derive(Error, Debug)]
pub enum Error {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("write {path}: {err}")]
    WriteFile { err: std::io::Error, path: String },
}

pub fn render(ingress: &Ingress) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(ingress)?;
    Ok(format!("{DOCUMENT_SEPARATOR}{yaml}"))
}

/// Render several resources into one multi-document stream.
pub fn render_all<'a, I>(ingresses: I) -> Result<String, Error>
where
    I: IntoIterator<Item = &'a Ingress>,
{
    ingresses
        .into_iter()
        .map(render)
        .collect::<Result<Vec<_>, _>>()
        .map(|documents| documents.concat())
}

/// Write `data` to `path`, replacing whatever is there.
///
/// The data lands in a temporary file next to the target first, so readers
/// never observe a half-written template.
pub fn write_template_file(path: &Path, data: &str) -> Result<(), Error> {
    let write_error = |err: std::io::Error| Error::WriteFile {
        err,
        path: path.display().to_string(),
    };
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(directory).map_err(write_error)?;
    file.write_all(data.as_bytes()).map_err(write_error)?;
    file.persist(path).map_err(|err| write_error(err.error))?;
    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
