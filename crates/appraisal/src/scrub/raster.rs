use super::ScrubOutcome;
use crate::error::ScrubError;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// APP1 (EXIF, XMP), APP12 (Ducky), APP13 (IPTC/Photoshop) and COM.
const JPEG_METADATA_MARKERS: [u8; 4] = [0xE1, 0xEC, 0xED, 0xFE];

const PNG_METADATA_CHUNKS: [&[u8; 4]; 5] = [b"tEXt", b"zTXt", b"iTXt", b"eXIf", b"tIME"];

/// Drops metadata segments. Entropy-coded data from the first SOS onward is
/// copied byte for byte.
pub fn scrub_jpeg(bytes: &[u8]) -> Result<ScrubOutcome, ScrubError> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return Err(ScrubError::MalformedJpeg("missing SOI marker".to_string()));
    }

    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(&bytes[..2]);
    let mut had_metadata = false;
    let mut pos = 2;

    loop {
        if pos >= bytes.len() {
            return Err(ScrubError::MalformedJpeg(
                "ended before start of scan".to_string(),
            ));
        }
        if bytes[pos] != 0xFF {
            return Err(ScrubError::MalformedJpeg(format!(
                "expected marker at offset {}",
                pos
            )));
        }

        // Fill bytes may pad a marker.
        let mut marker_pos = pos + 1;
        while bytes.get(marker_pos) == Some(&0xFF) {
            marker_pos += 1;
        }
        let marker = *bytes.get(marker_pos).ok_or_else(|| {
            ScrubError::MalformedJpeg("truncated marker".to_string())
        })?;

        match marker {
            0xDA => {
                out.extend_from_slice(&bytes[marker_pos - 1..]);
                break;
            }
            0xD9 => {
                out.extend_from_slice(&[0xFF, 0xD9]);
                break;
            }
            0x01 | 0xD0..=0xD7 => {
                out.extend_from_slice(&[0xFF, marker]);
                pos = marker_pos + 1;
            }
            _ => {
                let len_at = marker_pos + 1;
                let length = bytes
                    .get(len_at..len_at + 2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
                    .ok_or_else(|| ScrubError::MalformedJpeg("truncated segment".to_string()))?;
                if length < 2 {
                    return Err(ScrubError::MalformedJpeg(format!(
                        "invalid segment length {}",
                        length
                    )));
                }
                let end = len_at + length;
                if end > bytes.len() {
                    return Err(ScrubError::MalformedJpeg("truncated segment".to_string()));
                }

                if JPEG_METADATA_MARKERS.contains(&marker) {
                    had_metadata = true;
                } else {
                    out.push(0xFF);
                    out.extend_from_slice(&bytes[marker_pos..end]);
                }
                pos = end;
            }
        }
    }

    Ok(ScrubOutcome {
        bytes: out,
        had_metadata,
    })
}

/// Drops textual, EXIF and timestamp chunks. Anything after IEND is
/// discarded.
pub fn scrub_png(bytes: &[u8]) -> Result<ScrubOutcome, ScrubError> {
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Err(ScrubError::MalformedPng("missing PNG signature".to_string()));
    }

    let mut out = Vec::with_capacity(bytes.len());
    out.extend_from_slice(PNG_SIGNATURE);
    let mut had_metadata = false;
    let mut pos = PNG_SIGNATURE.len();

    loop {
        let header = bytes
            .get(pos..pos + 8)
            .ok_or_else(|| ScrubError::MalformedPng("missing IEND chunk".to_string()))?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = &header[4..8];

        // length + type + data + crc
        let end = pos
            .checked_add(12)
            .and_then(|n| n.checked_add(length))
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| ScrubError::MalformedPng("truncated chunk".to_string()))?;

        if PNG_METADATA_CHUNKS.iter().any(|c| c.as_slice() == kind) {
            had_metadata = true;
        } else {
            out.extend_from_slice(&bytes[pos..end]);
        }

        pos = end;
        if kind == b"IEND" {
            break;
        }
    }

    Ok(ScrubOutcome {
        bytes: out,
        had_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
        let mut seg = vec![0xFF, marker];
        seg.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        seg.extend_from_slice(payload);
        seg
    }

    fn jpeg(segments: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8];
        for s in segments {
            bytes.extend_from_slice(s);
        }
        bytes.extend_from_slice(&segment(0xDA, &[1, 1, 0, 0, 63, 0]));
        bytes.extend_from_slice(&[0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56]);
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        bytes
    }

    fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut c = (data.len() as u32).to_be_bytes().to_vec();
        c.extend_from_slice(kind);
        c.extend_from_slice(data);
        c.extend_from_slice(&[0, 0, 0, 0]);
        c
    }

    #[test]
    fn test_jpeg_exif_and_comment_removed() {
        let jfif = segment(0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");
        let exif = segment(0xE1, b"Exif\0\0GPS 47.6N 122.3W");
        let comment = segment(0xFE, b"Canon EOS");
        let dqt = segment(0xDB, &[0u8; 65]);

        let input = jpeg(&[jfif.clone(), exif, comment, dqt.clone()]);
        let outcome = scrub_jpeg(&input).unwrap();

        assert!(outcome.had_metadata);
        assert_eq!(outcome.bytes, jpeg(&[jfif, dqt]));
        assert!(!outcome.bytes.windows(4).any(|w| w == b"Exif"));
    }

    #[test]
    fn test_jpeg_without_metadata_is_unchanged() {
        let input = jpeg(&[segment(0xDB, &[0u8; 65])]);
        let outcome = scrub_jpeg(&input).unwrap();
        assert!(!outcome.had_metadata);
        assert_eq!(outcome.bytes, input);
    }

    #[test]
    fn test_jpeg_truncated_segment() {
        let mut input = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x40];
        input.extend_from_slice(b"Exif");
        assert!(matches!(
            scrub_jpeg(&input),
            Err(ScrubError::MalformedJpeg(_))
        ));
    }

    #[test]
    fn test_png_text_chunks_removed() {
        let ihdr = chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 0, 0, 0, 0]);
        let text = chunk(b"tEXt", b"Author\0Jane Appraiser");
        let time = chunk(b"tIME", &[7, 234, 1, 1, 0, 0, 0]);
        let idat = chunk(b"IDAT", &[1, 2, 3]);
        let iend = chunk(b"IEND", &[]);

        let mut input = PNG_SIGNATURE.to_vec();
        for c in [&ihdr, &text, &time, &idat, &iend] {
            input.extend_from_slice(c);
        }
        input.extend_from_slice(b"trailing garbage");

        let outcome = scrub_png(&input).unwrap();

        let mut expected = PNG_SIGNATURE.to_vec();
        for c in [&ihdr, &idat, &iend] {
            expected.extend_from_slice(c);
        }
        assert!(outcome.had_metadata);
        assert_eq!(outcome.bytes, expected);
    }

    #[test]
    fn test_png_missing_iend() {
        let mut input = PNG_SIGNATURE.to_vec();
        input.extend_from_slice(&chunk(b"IHDR", &[0; 13]));
        assert!(matches!(scrub_png(&input), Err(ScrubError::MalformedPng(_))));
    }
}
