//! MIME type sniffing for uploads.
//!
//! The sniffed type comes from the payload's leading bytes. Disagreement
//! between the declared type, the sniffed type and the type implied by the
//! file extension is reported, never rejected.

use tracing::warn;

pub const OCTET_STREAM: &str = "application/octet-stream";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";

/// Bytes inspected when sniffing.
const SNIFF_LEN: usize = 512;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"Rar!\x1a\x07", "application/x-rar-compressed"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"OggS\x00", "application/ogg"),
    (b"ID3", "audio/mpeg"),
    (b"\x00asm", "application/wasm"),
    (b"%!PS-Adobe-", "application/postscript"),
];

const HTML_PREFIXES: &[&[u8]] = &[b"<!doctype html", b"<html", b"<head", b"<body", b"<script"];

/// Sniff the MIME type of a payload from its content.
pub fn sniff(payload: &[u8]) -> &'static str {
    let head = &payload[..payload.len().min(SNIFF_LEN)];

    if let Some(mime) = SIGNATURES
        .iter()
        .find_map(|(magic, mime)| head.starts_with(magic).then_some(*mime))
    {
        return mime;
    }

    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }

    let text = head.trim_ascii_start();
    if HTML_PREFIXES
        .iter()
        .any(|prefix| starts_with_ignore_case(text, prefix))
    {
        return TEXT_HTML;
    }
    if starts_with_ignore_case(text, b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if looks_like_text(head) {
        TEXT_PLAIN
    } else {
        OCTET_STREAM
    }
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn looks_like_text(head: &[u8]) -> bool {
    let valid_utf8 = match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut at the sniff boundary
        Err(e) => e.error_len().is_none(),
    };
    valid_utf8
        && !head
            .iter()
            .any(|b| matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f))
}

/// MIME type implied by a file name's extension, if known.
pub fn from_extension(filename: &str) -> Option<String> {
    mime_guess::from_path(filename)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn top_level(mime: &str) -> String {
    essence(mime).split('/').next().unwrap_or_default().to_string()
}

/// Whether a declared type is compatible with the payload.
///
/// Compatible when the declared type equals the sniffed type or the
/// extension's type, or shares the sniffed type's top-level type.
pub fn is_compatible(declared: &str, sniffed: &str, filename: &str) -> bool {
    let declared_essence = essence(declared);
    if declared_essence == essence(sniffed) {
        return true;
    }
    if from_extension(filename).is_some_and(|ext| ext == declared_essence) {
        return true;
    }
    top_level(declared) == top_level(sniffed)
}

/// Sniff the payload and log a warning if the declared type disagrees.
pub fn sniff_and_check(payload: &[u8], filename: &str, declared: &str) -> &'static str {
    let sniffed = sniff(payload);
    if !declared.is_empty() && !is_compatible(declared, sniffed, filename) {
        warn!(
            filename,
            declared,
            sniffed,
            extension = from_extension(filename).as_deref().unwrap_or("unknown"),
            "declared MIME type does not match content"
        );
    }
    sniffed
}
