//! Minimal `multipart/form-data` decoding for manifest uploads.
//!
//! Bodies are small and fully buffered, so this works on a byte slice and
//! only understands what browsers and HTTP clients send for form uploads:
//! one `Content-Disposition` header per part with `name` and an optional
//! `filename`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("expected multipart/form-data with a boundary")]
    MissingBoundary,
    #[error("malformed multipart body: {0}")]
    Malformed(&'static str),
    #[error("missing form field '{0}'")]
    MissingField(String),
    #[error("form field '{0}' must be a file upload")]
    NotAFile(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Form {
    parts: Vec<Part>,
}

impl Form {
    pub fn parse(content_type: &str, body: &[u8]) -> Result<Self, MultipartError> {
        let boundary = boundary(content_type).ok_or(MultipartError::MissingBoundary)?;
        Ok(Self {
            parts: parse_parts(body, &boundary)?,
        })
    }

    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// The named file part, which must carry a non-empty file name.
    pub fn file(&self, name: &str) -> Result<&Part, MultipartError> {
        let part = self
            .part(name)
            .ok_or_else(|| MultipartError::MissingField(name.to_owned()))?;
        match part.file_name.as_deref() {
            Some(f) if !f.is_empty() => Ok(part),
            _ => Err(MultipartError::NotAFile(name.to_owned())),
        }
    }

    /// A text field, trimmed. Blank values count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        let part = self.part(name)?;
        let value = String::from_utf8_lossy(&part.data).trim().to_owned();
        (!value.is_empty()).then_some(value)
    }
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media = params.next()?.trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.find_map(|p| {
        let (key, value) = p.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_owned())
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn parse_parts(body: &[u8], boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");

    let mut pos = find(body, delimiter.as_bytes(), 0)
        .ok_or(MultipartError::Malformed("no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(MultipartError::Malformed("boundary not followed by CRLF"));
        }
        pos += 2;

        let header_end = find(body, b"\r\n\r\n", pos)
            .ok_or(MultipartError::Malformed("unterminated part headers"))?;
        let headers = std::str::from_utf8(&body[pos..header_end])
            .map_err(|_| MultipartError::Malformed("part headers are not UTF-8"))?;
        let data_start = header_end + 4;
        let data_end = find(body, next_delimiter.as_bytes(), data_start)
            .ok_or(MultipartError::Malformed("missing closing boundary"))?;

        if let Some((name, file_name)) = disposition(headers) {
            parts.push(Part {
                name,
                file_name,
                data: body[data_start..data_end].to_vec(),
            });
        }
        pos = data_end + next_delimiter.len();
    }
}

/// `name` and `filename` from a part's `Content-Disposition` header.
fn disposition(headers: &str) -> Option<(String, Option<String>)> {
    let value = headers.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(value)
    })?;

    let mut name = None;
    let mut file_name = None;
    for (key, val) in params(value) {
        match key.to_ascii_lowercase().as_str() {
            "name" => name = Some(val),
            "filename" => file_name = Some(base_name(&val).to_owned()),
            _ => {}
        }
    }
    Some((name?, file_name))
}

/// Split `form-data; name="a"; filename="b;c.yml"` into key/value pairs,
/// honouring quotes.
fn params(value: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => escaped = true,
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    for segment in segments {
        if let Some((k, v)) = segment.split_once('=') {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            out.push((k.trim().to_owned(), v.to_owned()));
        }
    }
    out
}

/// Some clients send a full client-side path as the file name.
fn base_name(file_name: &str) -> &str {
    file_name.rsplit(['/', '\\']).next().unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=XyZ";

    fn body(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut out = String::new();
        for (name, file, data) in parts {
            out.push_str("--XyZ\r\n");
            match file {
                Some(f) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )),
                None => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            out.push_str(data);
            out.push_str("\r\n");
        }
        out.push_str("--XyZ--\r\n");
        out.into_bytes()
    }

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(boundary(CT).as_deref(), Some("XyZ"));
        assert_eq!(
            boundary("multipart/form-data; charset=utf-8; boundary=\"a b\"").as_deref(),
            Some("a b")
        );
        assert_eq!(boundary("application/json"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn parses_file_and_text_fields() {
        let data = body(&[
            ("file", Some("environment.yml"), "name: dev\ndependencies:\n  - numpy\n"),
            ("name", None, " renamed "),
            ("python_version", None, ""),
        ]);
        let form = Form::parse(CT, &data).unwrap();

        let file = form.file("file").unwrap();
        assert_eq!(file.file_name.as_deref(), Some("environment.yml"));
        assert_eq!(file.data, b"name: dev\ndependencies:\n  - numpy\n");
        assert_eq!(form.text("name").as_deref(), Some("renamed"));
        assert_eq!(form.text("python_version"), None);
        assert_eq!(form.text("absent"), None);
    }

    #[test]
    fn binary_content_survives() {
        let mut data = b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"r.txt\"\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xff, 0x00, b'\r', b'\n', b'-', b'-']);
        data.extend_from_slice(b"\r\n--XyZ--\r\n");

        let form = Form::parse(CT, &data).unwrap();
        assert_eq!(form.file("file").unwrap().data, vec![0xff, 0x00, b'\r', b'\n', b'-', b'-']);
    }

    #[test]
    fn quoted_semicolon_and_client_path_in_file_name() {
        let data = body(&[("file", Some("C:\\\\Users\\\\me\\\\env;v2.yml"), "x")]);
        let form = Form::parse(CT, &data).unwrap();
        assert_eq!(
            form.file("file").unwrap().file_name.as_deref(),
            Some("env;v2.yml")
        );
    }

    #[test]
    fn missing_or_non_file_field() {
        let data = body(&[("file", None, "plain text")]);
        let form = Form::parse(CT, &data).unwrap();
        assert_eq!(
            form.file("file").unwrap_err(),
            MultipartError::NotAFile("file".to_owned())
        );
        assert_eq!(
            form.file("upload").unwrap_err(),
            MultipartError::MissingField("upload".to_owned())
        );
    }

    #[test]
    fn rejects_missing_boundary_and_truncated_body() {
        assert_eq!(
            Form::parse("multipart/form-data", b"").unwrap_err(),
            MultipartError::MissingBoundary
        );
        let truncated = b"--XyZ\r\nContent-Disposition: form-data; name=\"file\"\r\n\r\nabc";
        assert!(matches!(
            Form::parse(CT, truncated),
            Err(MultipartError::Malformed(_))
        ));
    }
}
