use crate::error::TypeError;
use crate::ledger::LedgerId;

/// Ids below this value use the short 10-digit layout.
const SHORT_LAYOUT_LIMIT: LedgerId = i32::MAX as LedgerId;

/// Segment widths of the zero-padded decimal id.
const SHORT_LAYOUT: [usize; 3] = [2, 4, 4];
const LONG_LAYOUT: [usize; 5] = [3, 4, 4, 4, 4];

/// Marker prefixed to the final path component.
const LEAF_MARKER: char = 'L';

/// Coordination-store path of a ledger's metadata node, relative to the
/// ledgers root.
///
/// The zero-padded decimal id is split into fixed-width directory levels so
/// no single directory node grows unbounded: `12` becomes `00/0000/L0012`,
/// and ids from `2^31 - 1` upward use the 19-digit `3/4/4/4/4` layout.
pub fn ledger_path(ledger_id: LedgerId) -> Result<String, TypeError> {
    if ledger_id < 0 {
        return Err(TypeError::NegativeLedgerId(ledger_id));
    }
    let (digits, widths): (String, &[usize]) = if ledger_id < SHORT_LAYOUT_LIMIT {
        (format!("{ledger_id:010}"), &SHORT_LAYOUT)
    } else {
        (format!("{ledger_id:019}"), &LONG_LAYOUT)
    };

    let mut parts = Vec::with_capacity(widths.len());
    let mut offset = 0;
    for (i, width) in widths.iter().enumerate() {
        let chunk = &digits[offset..offset + width];
        if i + 1 == widths.len() {
            parts.push(format!("{LEAF_MARKER}{chunk}"));
        } else {
            parts.push(chunk.to_string());
        }
        offset += width;
    }
    Ok(parts.join("/"))
}

/// Inverse of [`ledger_path`]. Only canonical paths are accepted.
pub fn ledger_id_from_path(path: &str) -> Result<LedgerId, TypeError> {
    let invalid = || TypeError::InvalidLedgerPath(path.to_string());

    let parts: Vec<&str> = path.split('/').collect();
    let widths: &[usize] = match parts.len() {
        3 => &SHORT_LAYOUT,
        5 => &LONG_LAYOUT,
        _ => return Err(invalid()),
    };

    let mut digits = String::with_capacity(19);
    for (i, (part, width)) in parts.iter().zip(widths).enumerate() {
        let chunk = if i + 1 == parts.len() {
            part.strip_prefix(LEAF_MARKER).ok_or_else(invalid)?
        } else {
            part
        };
        if chunk.len() != *width || !chunk.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        digits.push_str(chunk);
    }

    let id: LedgerId = digits.parse().map_err(|_| invalid())?;
    if ledger_path(id)? != path {
        return Err(invalid());
    }
    Ok(id)
}
