use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Parse error at line {line} near `{near}`")]
    Parse { line: usize, near: String },
    #[error("Texture name `{name}` is too long for the format")]
    TextureName { name: String },
    #[error("Cannot read file `{path}`: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}
