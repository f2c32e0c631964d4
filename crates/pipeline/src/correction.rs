//! Correction-marker detection.
//!
//! A user self-correcting ("actually, make that two") must cancel the
//! in-flight speculation immediately, without waiting for the debounce to
//! notice new speech. Matching is word-bounded and case-insensitive.

const MARKERS: [&str; 4] = ["actually", "wait", "sorry", "no"];

/// True when any correction marker appears as a whole word.
pub fn contains_correction_marker(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|word| {
            MARKERS
                .iter()
                .any(|marker| word.eq_ignore_ascii_case(marker))
        })
}
