//! Auxiliary (`TAG:TYPE:VALUE`) fields.
//!
//! SAM text fields are converted to the BAM binary layout so both input
//! formats carry identical bytes; BAM blocks are walked to validate the type
//! codes.

use crate::error::{Result, SqzError};

fn unknown_type(tag: &[u8], code: u8) -> SqzError {
    SqzError::UnknownAuxType {
        tag: String::from_utf8_lossy(tag).into_owned(),
        code,
    }
}

/// Append the smallest integer encoding that holds `v`.
fn push_integer(out: &mut Vec<u8>, v: i64) -> std::result::Result<(), String> {
    if v >= 0 {
        if v <= u8::MAX as i64 {
            out.push(b'C');
            out.push(v as u8);
        } else if v <= u16::MAX as i64 {
            out.push(b'S');
            out.extend_from_slice(&(v as u16).to_le_bytes());
        } else if v <= u32::MAX as i64 {
            out.push(b'I');
            out.extend_from_slice(&(v as u32).to_le_bytes());
        } else {
            return Err(format!("integer {v} out of range"));
        }
    } else if v >= i8::MIN as i64 {
        out.push(b'c');
        out.push(v as i8 as u8);
    } else if v >= i16::MIN as i64 {
        out.push(b's');
        out.extend_from_slice(&(v as i16).to_le_bytes());
    } else if v >= i32::MIN as i64 {
        out.push(b'i');
        out.extend_from_slice(&(v as i32).to_le_bytes());
    } else {
        return Err(format!("integer {v} out of range"));
    }
    Ok(())
}

fn push_array_element(out: &mut Vec<u8>, subtype: u8, value: &str) -> std::result::Result<(), String> {
    let bad = || format!("invalid '{}' array element '{value}'", subtype as char);
    match subtype {
        b'c' => out.push(value.parse::<i8>().map_err(|_| bad())? as u8),
        b'C' => out.push(value.parse::<u8>().map_err(|_| bad())?),
        b's' => out.extend_from_slice(&value.parse::<i16>().map_err(|_| bad())?.to_le_bytes()),
        b'S' => out.extend_from_slice(&value.parse::<u16>().map_err(|_| bad())?.to_le_bytes()),
        b'i' => out.extend_from_slice(&value.parse::<i32>().map_err(|_| bad())?.to_le_bytes()),
        b'I' => out.extend_from_slice(&value.parse::<u32>().map_err(|_| bad())?.to_le_bytes()),
        b'f' => out.extend_from_slice(&value.parse::<f32>().map_err(|_| bad())?.to_le_bytes()),
        _ => return Err(format!("unknown array subtype '{}'", subtype as char)),
    }
    Ok(())
}

/// Convert one SAM aux field (`XX:T:value`) to binary, appending to `out`.
pub fn sam_field_to_binary(field: &[u8], out: &mut Vec<u8>, line: u64) -> Result<()> {
    if field.len() < 5 || field[2] != b':' || field[4] != b':' {
        return Err(SqzError::sam(
            line,
            format!("malformed auxiliary field '{}'", String::from_utf8_lossy(field)),
        ));
    }
    let tag = &field[..2];
    let code = field[3];
    let raw = &field[5..];
    let value = std::str::from_utf8(raw)
        .map_err(|_| SqzError::sam(line, "auxiliary value is not valid UTF-8"))?;
    let tag_name = String::from_utf8_lossy(tag);
    let sam_err = |msg: String| SqzError::sam(line, format!("{tag_name}: {msg}"));

    out.extend_from_slice(tag);
    match code {
        b'A' => {
            if raw.len() != 1 {
                return Err(sam_err("type A needs exactly one character".to_string()));
            }
            out.push(b'A');
            out.push(raw[0]);
        }
        b'i' => {
            let v: i64 = value
                .parse()
                .map_err(|_| sam_err(format!("invalid integer '{value}'")))?;
            push_integer(out, v).map_err(sam_err)?;
        }
        b'f' => {
            let v: f32 = value
                .parse()
                .map_err(|_| sam_err(format!("invalid float '{value}'")))?;
            out.push(b'f');
            out.extend_from_slice(&v.to_le_bytes());
        }
        b'Z' | b'H' => {
            if code == b'H' && (raw.len() % 2 != 0 || !raw.iter().all(u8::is_ascii_hexdigit)) {
                return Err(sam_err(format!("invalid hex string '{value}'")));
            }
            out.push(code);
            out.extend_from_slice(raw);
            out.push(0);
        }
        b'B' => {
            let mut parts = value.split(',');
            let subtype = parts.next().unwrap_or("");
            let sub = match subtype.as_bytes() {
                [s @ (b'c' | b'C' | b's' | b'S' | b'i' | b'I' | b'f')] => *s,
                [s] => return Err(unknown_type(tag, *s)),
                _ => return Err(sam_err(format!("invalid array subtype '{subtype}'"))),
            };
            out.push(b'B');
            out.push(sub);
            let count_at = out.len();
            out.extend_from_slice(&0u32.to_le_bytes());
            let mut count = 0u32;
            for element in parts {
                push_array_element(out, sub, element).map_err(sam_err)?;
                count += 1;
            }
            out[count_at..count_at + 4].copy_from_slice(&count.to_le_bytes());
        }
        other => return Err(unknown_type(tag, other)),
    }
    Ok(())
}

fn fixed_width(code: u8) -> Option<usize> {
    match code {
        b'A' | b'c' | b'C' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

/// Walk a binary aux block, checking every type code and length.
/// Returns the number of fields.
pub fn validate_binary(data: &[u8]) -> Result<usize> {
    let truncated = || SqzError::InvalidBam("auxiliary data truncated".to_string());
    let mut at = 0;
    let mut fields = 0;
    while at < data.len() {
        let tag = data.get(at..at + 2).ok_or_else(truncated)?;
        let code = *data.get(at + 2).ok_or_else(truncated)?;
        at += 3;
        if let Some(width) = fixed_width(code) {
            at += width;
        } else {
            match code {
                b'Z' | b'H' => {
                    let nul = data[at.min(data.len())..]
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(truncated)?;
                    at += nul + 1;
                }
                b'B' => {
                    let sub = *data.get(at).ok_or_else(truncated)?;
                    let width = match fixed_width(sub) {
                        Some(w) if sub != b'A' => w,
                        _ => return Err(unknown_type(tag, sub)),
                    };
                    let count = data
                        .get(at + 1..at + 5)
                        .and_then(|s| <[u8; 4]>::try_from(s).ok())
                        .map(u32::from_le_bytes)
                        .ok_or_else(truncated)?;
                    at += 5 + width * count as usize;
                }
                other => return Err(unknown_type(tag, other)),
            }
        }
        if at > data.len() {
            return Err(truncated());
        }
        fields += 1;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(field: &str) -> Vec<u8> {
        let mut out = Vec::new();
        sam_field_to_binary(field.as_bytes(), &mut out, 1).unwrap();
        out
    }

    #[test]
    fn test_integer_width_selection() {
        assert_eq!(convert("NM:i:3"), b"NMC\x03");
        assert_eq!(convert("XS:i:300"), b"XSS\x2c\x01");
        assert_eq!(convert("XL:i:70000"), [b'X', b'L', b'I', 0x70, 0x11, 0x01, 0x00]);
        assert_eq!(convert("XN:i:-1"), b"XNc\xff");
        assert_eq!(convert("XM:i:-200"), [b'X', b'M', b's', 0x38, 0xff]);
        assert_eq!(convert("XB:i:-40000"), [b'X', b'B', b'i', 0xc0, 0x63, 0xff, 0xff]);
    }

    #[test]
    fn test_string_char_float() {
        assert_eq!(convert("RG:Z:grp1"), b"RGZgrp1\0");
        assert_eq!(convert("XA:A:q"), b"XAAq");
        let f = convert("XF:f:1.5");
        assert_eq!(&f[..3], b"XFf");
        assert_eq!(f32::from_le_bytes([f[3], f[4], f[5], f[6]]), 1.5);
        assert_eq!(convert("XH:H:1AE3"), b"XHH1AE3\0");
    }

    #[test]
    fn test_b_array() {
        let out = convert("ZB:B:s,-1,2,300");
        assert_eq!(&out[..4], b"ZBBs");
        assert_eq!(u32::from_le_bytes([out[4], out[5], out[6], out[7]]), 3);
        assert_eq!(i16::from_le_bytes([out[8], out[9]]), -1);
        assert_eq!(i16::from_le_bytes([out[12], out[13]]), 300);
        assert_eq!(validate_binary(&out).unwrap(), 1);
    }

    #[test]
    fn test_unknown_types_rejected() {
        let mut out = Vec::new();
        let err = sam_field_to_binary(b"XX:q:1", &mut out, 1).unwrap_err();
        assert!(matches!(err, SqzError::UnknownAuxType { code: b'q', .. }));
        let err = sam_field_to_binary(b"XX:B:q,1", &mut out, 1).unwrap_err();
        assert!(matches!(err, SqzError::UnknownAuxType { code: b'q', .. }));
        assert!(sam_field_to_binary(b"XX:i", &mut out, 1).is_err());
    }

    #[test]
    fn test_validate_binary_walks_fields() {
        let mut data = convert("NM:i:3");
        data.extend(convert("RG:Z:x"));
        data.extend(convert("XF:f:2"));
        assert_eq!(validate_binary(&data).unwrap(), 3);
        assert!(validate_binary(&data[..data.len() - 1]).is_err());
        assert!(validate_binary(b"XXq\x01").is_err());
    }

    #[test]
    fn test_array_element_rejects_unknown_subtype() {
        let mut out = Vec::new();
        assert!(push_array_element(&mut out, b'q', "1").is_err());
        assert!(push_array_element(&mut out, b'C', "300").is_err());
        push_array_element(&mut out, b's', "-2").unwrap();
        assert_eq!(out, (-2i16).to_le_bytes());
    }
}
