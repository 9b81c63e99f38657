//! multipart/form-data encoding and field extraction.
//!
//! Only what the image endpoints need: file parts out, named part lookup in.

use rand::RngCore;

/// A single file part.
#[derive(Debug)]
pub struct FilePart<'a> {
    pub field: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
}

/// Encoded request body plus its Content-Type header value.
#[derive(Debug)]
pub struct MultipartBody {
    pub content_type: String,
    pub body: Vec<u8>,
}

pub fn encode(parts: &[FilePart<'_>]) -> MultipartBody {
    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);
    let boundary = format!("----zkpa-{}", hex::encode(nonce));

    let payload_len: usize = parts.iter().map(|p| p.bytes.len() + 256).sum();
    let mut body = Vec::with_capacity(payload_len + boundary.len() + 8);
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quoted(part.field),
                escape_quoted(part.file_name)
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
        body.extend_from_slice(part.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    MultipartBody {
        content_type: format!("multipart/form-data; boundary={}", boundary),
        body,
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' | '\r' | '\n' => '_',
            c => c,
        })
        .collect()
}

/// Extract the boundary parameter from a multipart Content-Type value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Body bytes of the part named `field`, if present.
pub fn find_field<'a>(body: &'a [u8], boundary: &str, field: &str) -> Option<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let wanted = format!("name=\"{}\"", field);

    let mut rest = body;
    while let Some(start) = find(rest, delimiter) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            return None;
        }
        let headers_end = find(rest, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&rest[..headers_end]);
        let content = &rest[headers_end + 4..];
        let content_end = find(content, delimiter)?;
        let is_wanted = headers.lines().any(|line| {
            line.to_ascii_lowercase().starts_with("content-disposition") && line.contains(&wanted)
        });
        if is_wanted {
            let part = &content[..content_end];
            return Some(part.strip_suffix(b"\r\n").unwrap_or(part));
        }
        rest = &content[content_end..];
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_image_part_can_be_found_again() {
        let bytes = [0u8, 1, 2, b'\r', b'\n', 255];
        let form = encode(&[FilePart {
            field: "image",
            file_name: "shot.png",
            content_type: "image/png",
            bytes: &bytes,
        }]);
        let boundary = boundary_from_content_type(&form.content_type).expect("boundary");
        assert_eq!(find_field(&form.body, &boundary, "image"), Some(&bytes[..]));
        assert_eq!(find_field(&form.body, &boundary, "other"), None);
    }

    #[test]
    fn boundary_requires_multipart_form() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"abc\""),
            Some("abc".to_string())
        );
        assert_eq!(boundary_from_content_type("application/json"), None);
        assert_eq!(boundary_from_content_type("text/plain; boundary=abc"), None);
    }
}
