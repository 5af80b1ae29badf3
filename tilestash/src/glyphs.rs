//! Glyph range enumeration for offline downloads.
//!
//! Glyphs are served in fixed ranges of 256 code points each, covering the
//! basic multilingual plane. CJK ideograph ranges are large and rarely needed
//! outside east-asian locales, so they are only included when a region opts
//! in via `include_ideographs`.

/// Number of code points served per glyph range.
const GLYPHS_PER_RANGE: u32 = 256;

/// Number of glyph ranges per font stack (covers U+0000..U+FFFF).
const RANGES_PER_FONT_STACK: u32 = 256;

/// Unicode blocks treated as ideographic for download purposes.
const IDEOGRAPH_BLOCKS: &[(u32, u32)] = &[
    // CJK Unified Ideographs Extension A
    (0x3400, 0x4DBF),
    // CJK Unified Ideographs
    (0x4E00, 0x9FFF),
    // CJK Compatibility Ideographs
    (0xF900, 0xFAFF),
];

fn is_ideographic(code_point: u32) -> bool {
    IDEOGRAPH_BLOCKS
        .iter()
        .any(|&(start, end)| code_point >= start && code_point <= end)
}

/// Iterates over the `(first, last)` code point pairs of the glyph ranges a
/// font stack requires.
pub(crate) fn glyph_ranges(include_ideographs: bool) -> impl Iterator<Item = (u32, u32)> {
    (0..RANGES_PER_FONT_STACK).filter_map(move |range| {
        let start = range * GLYPHS_PER_RANGE;
        if !include_ideographs && is_ideographic(start) {
            None
        } else {
            Some((start, start + GLYPHS_PER_RANGE - 1))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ranges_with_ideographs() {
        let ranges: Vec<_> = glyph_ranges(true).collect();
        assert_eq!(ranges.len(), 256);
        assert_eq!(ranges[0], (0, 255));
        assert_eq!(ranges[255], (0xFF00, 0xFFFF));
    }

    #[test]
    fn ideographic_ranges_are_skipped() {
        let ranges: Vec<_> = glyph_ranges(false).collect();
        // 26 ranges in Extension A, 82 in the unified block, 2 compatibility.
        assert_eq!(ranges.len(), 256 - 26 - 82 - 2);
        assert!(!ranges.iter().any(|&(start, _)| start == 0x4E00));
        assert!(ranges.iter().any(|&(start, _)| start == 0x0400));
    }

    #[test]
    fn ranges_are_contiguous_256_blocks() {
        for (start, end) in glyph_ranges(true) {
            assert_eq!(end - start + 1, GLYPHS_PER_RANGE);
            assert_eq!(start % GLYPHS_PER_RANGE, 0);
        }
    }
}
