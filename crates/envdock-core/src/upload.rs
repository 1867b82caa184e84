use crate::CoreError;
use envdock_schema::ManifestFormat;
use std::io::Write;
use tempfile::NamedTempFile;

/// An uploaded manifest: the client's file name and raw bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    pub fn format(&self) -> Result<ManifestFormat, CoreError> {
        Ok(ManifestFormat::from_file_name(&self.file_name)?)
    }

    /// Write the upload to a temporary file for the tool to read.
    ///
    /// The file keeps the manifest's extension (`conda env create` dispatches
    /// on it) and is deleted when the returned handle drops, on every path.
    pub fn to_temp_file(&self, format: ManifestFormat) -> Result<NamedTempFile, CoreError> {
        let mut file = tempfile::Builder::new()
            .prefix("envdock-upload-")
            .suffix(format.suffix())
            .tempfile()?;
        file.write_all(&self.data)?;
        file.flush()?;
        Ok(file)
    }
}
