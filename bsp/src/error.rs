use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BspError {
    #[error("Unsupported BSP version: {version:#x}")]
    UnsupportedVersion { version: i32 },
    #[error("Cannot parse entity lump")]
    ParseEntities,
    #[error("Cannot parse {lump} lump")]
    ParseLump { lump: &'static str },
    #[error("Lump directory out of range")]
    LumpBounds,
    #[error("{what} does not fit in the {format} format")]
    FormatOverflow { what: &'static str, format: String },
    #[error("Clipnode child {value} out of range for 16-bit storage")]
    ClipnodeRange { value: i32 },
    #[error("Cannot read file `{path}`: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl BspError {
    pub fn to_result<T>(self) -> Result<T, Self> {
        Err(self)
    }
}
