//! Content-type sniffing over the leading bytes of an upload.
//!
//! The sniffer only peeks: callers keep the returned header buffer and feed
//! it to the writer ahead of the remaining stream.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum number of leading bytes inspected.
pub const SNIFF_LEN: usize = 512;

/// Returned when nothing in the header matches a known signature.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// Extension used when neither the filename nor the content type yields one.
pub const FALLBACK_EXTENSION: &str = ".jpg";

/// Read up to [`SNIFF_LEN`] bytes from the head of `reader`.
///
/// Short reads are retried until the buffer is full or the stream ends, so
/// a chunked transport still yields a full header.
pub async fn read_header<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = Vec::with_capacity(SNIFF_LEN);
    reader.take(SNIFF_LEN as u64).read_to_end(&mut header).await?;
    Ok(header)
}

/// Classify `header` into a content type string.
pub fn sniff_content_type(header: &[u8]) -> &'static str {
    let header = &header[..header.len().min(SNIFF_LEN)];
    if header.is_empty() {
        return DEFAULT_CONTENT_TYPE;
    }

    // Checked first: infer reports `<?xml` prologues as text/xml.
    if looks_like_svg(header) {
        return SVG_CONTENT_TYPE;
    }

    if let Some(kind) = infer::get(header) {
        return kind.mime_type();
    }

    if is_text(header) {
        TEXT_CONTENT_TYPE
    } else {
        DEFAULT_CONTENT_TYPE
    }
}

/// True when the major type of `content_type` is `image`.
pub fn is_image(content_type: &str) -> bool {
    content_type
        .split_once('/')
        .is_some_and(|(major, _)| major.trim().eq_ignore_ascii_case("image"))
}

/// First known file extension (with leading dot) for `content_type`.
pub fn extension_for(content_type: &str) -> Option<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    // mime_guess lists jpeg variants alphabetically, which puts `.jfif` first.
    if essence == "image/jpeg" {
        return Some(".jpg".to_string());
    }

    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
}

/// Pick the extension for a stored file.
///
/// A non-empty extension on the declared filename wins verbatim. Otherwise
/// the sniffed type's first known extension, else [`FALLBACK_EXTENSION`].
pub fn choose_extension(filename: &str, content_type: &str) -> String {
    filename_extension(filename)
        .map(str::to_string)
        .or_else(|| extension_for(content_type))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Extension of the final path element, including the dot.
fn filename_extension(filename: &str) -> Option<&str> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rfind('.') {
        Some(idx) if idx + 1 < base.len() => Some(&base[idx..]),
        _ => None,
    }
}

/// True when the first element of the document is `<svg`.
///
/// Leading XML declarations, processing instructions, comments and an SVG
/// doctype are skipped. Any other doctype or element (an HTML page with
/// inline SVG included) is not SVG.
fn looks_like_svg(header: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(trim_utf8_tail(header)) else {
        return false;
    };
    let mut rest = text.trim_start_matches('\u{feff}');

    loop {
        rest = rest.trim_start();
        let skip = if rest.starts_with("<?") {
            rest.find("?>").map(|end| end + 2)
        } else if rest.starts_with("<!--") {
            rest.find("-->").map(|end| end + 3)
        } else if starts_with_ignore_case(rest, "<!doctype") {
            if !starts_with_ignore_case(rest["<!doctype".len()..].trim_start(), "svg") {
                return false;
            }
            rest.find('>').map(|end| end + 1)
        } else {
            break;
        };
        match skip {
            Some(end) => rest = &rest[end..],
            // Declaration cut off by the sniff window.
            None => return false,
        }
    }

    if !starts_with_ignore_case(rest, "<svg") {
        return false;
    }
    rest["<svg".len()..]
        .chars()
        .next()
        .is_none_or(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn is_text(header: &[u8]) -> bool {
    !header
        .iter()
        .any(|&b| b == 0 || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b)))
}

/// Drop a multi-byte character cut off by the sniff window.
fn trim_utf8_tail(bytes: &[u8]) -> &[u8] {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes,
        Err(err) if err.error_len().is_none() => &bytes[..err.valid_up_to()],
        Err(_) => bytes,
    }
}
