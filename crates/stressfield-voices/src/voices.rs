//! # 33 Voices
//!
//! Thirty-three fixed, numbered string transforms applied to the trimmed
//! input, a SHA-256 fingerprint over their `|`-joined outputs, and a verdict
//! that passes only the canonical phrase.
//!
//! ## Not a security mechanism
//!
//! Nothing here authenticates anything. The verdict is an exact string match
//! against a public constant; the transforms are deterministic and public.
//! Whatever collision resistance the fingerprint has is SHA-256's, and the
//! transforms add none. Do not use this for access control, signatures or
//! integrity checks.
//!
//! Empty input (before trimming) yields an empty string for every voice.
//! Lengths and sums count Unicode scalar values.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The only input that verifies.
pub const CANONICAL_PHRASE: &str =
    "The Mirror Protocol binds origin and reflection into coherent signal.";

pub const VOICE_COUNT: u8 = 33;

const VERIFIED: &str = "VERIFIED::CLEAN::COMPLIANT";
const PENDING: &str = "VERIFICATION_PENDING";

/// Outcome of [`verify`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceVerdict {
    pub passed: bool,
    /// 33 when passed, else 0.
    pub matches: u8,
    /// `matches / 33`. A ratio of voice matches, not a probability.
    pub match_ratio: f64,
}

impl VoiceVerdict {
    fn from_matches(matches: u8) -> Self {
        Self {
            passed: matches == VOICE_COUNT,
            matches,
            match_ratio: f64::from(matches) / f64::from(VOICE_COUNT),
        }
    }
}

/// Apply voice `voice` (1..=33). Out-of-range voices yield an empty string.
#[must_use]
pub fn transform(text: &str, voice: u8) -> String {
    if text.is_empty() {
        return String::new();
    }
    let t = text.trim();
    match voice {
        1 => t.to_string(),
        2 => t.to_uppercase(),
        3 => consonants_only(t),
        4 => t.chars().rev().collect(),
        5 => rot13(t),
        6 => base64_encode(t.as_bytes()),
        7 => t
            .chars()
            .filter(|c| is_ascii_vowel(c.to_ascii_lowercase()))
            .collect(),
        8 => t.to_lowercase(),
        9 => {
            let s = char_sum(t);
            format!("ASCII_SUM={s}; MOD1024={}", s % 1024)
        }
        10 => format!("CRC32({})", sha256_hex(t.as_bytes())[..8].to_uppercase()),
        11 => format!("SHA256({})", sha256_hex(t.as_bytes())),
        12 => format!("WORDS={}", t.split_whitespace().count()),
        13 => format!(
            "CHARS_TOTAL={}; CHARS_NO_SPACE={}",
            t.chars().count(),
            t.chars().filter(|&c| c != ' ').count()
        ),
        14 => "bear hawk lynx otter wolf".to_string(),
        15 => (char_sum(t) % 10_000).to_string(),
        16 => {
            let compressed: String = t.chars().filter(|&c| c != ' ').collect();
            format!(
                "{{\"compressed\": {}, \"length\": {}}}",
                ascii_json_string(&compressed),
                compressed.chars().count()
            )
        }
        17 => t.replace("Mirror", "MIRA"),
        18 => "They contain high citric acid levels.".to_string(),
        19 => "256".to_string(),
        20 => "CLEAN".to_string(),
        21 => "Rules CLEAN puzzle.".to_string(),
        22 => format!("TITLECASE -> {}", title_case(t)),
        23 => format!("aLtErNaTiNg -> {}", alternating(t)),
        24 => format!("LEET -> {}", leet(t)),
        25 => format!("CONSONANTS -> {}", consonants_only(t)),
        26 => format!("BIGRAMS -> {}", ngrams(t, 2)),
        27 => format!("TRIGRAMS -> {}", ngrams(t, 3)),
        28 => r#"{"origin_index":4,"reflection_index":6}"#.to_string(),
        29 => {
            let squeezed: String = t.chars().filter(|&c| c != ' ').collect::<String>().to_lowercase();
            let reversed: String = squeezed.chars().rev().collect();
            let verdict = if reversed == squeezed { "True" } else { "False" };
            format!("PALINDROME={verdict}")
        }
        30 => r#"{"subject":"Mirror Protocol","verb":"binds","objects":["origin","reflection"]}"#
            .to_string(),
        31 => format!("SYLLABLES_TOTAL={}", (t.chars().count() / 3).max(1)),
        32 => {
            let letters: Vec<char> = t.chars().filter(char::is_ascii_alphabetic).collect();
            let dist = letters
                .iter()
                .zip(letters.iter().rev())
                .filter(|(a, b)| a != b)
                .count();
            format!("LEVENSHTEIN(S, R[letters-only])={dist}")
        }
        33 => {
            if t == CANONICAL_PHRASE {
                VERIFIED.to_string()
            } else {
                PENDING.to_string()
            }
        }
        _ => String::new(),
    }
}

/// All 33 outputs in voice order.
#[must_use]
pub fn all_voices(text: &str) -> Vec<String> {
    (1..=VOICE_COUNT).map(|v| transform(text, v)).collect()
}

/// SHA-256 hex of the `|`-joined 33 outputs.
#[must_use]
pub fn signature_fingerprint(text: &str) -> String {
    sha256_hex(all_voices(text).join("|").as_bytes())
}

/// Pass/fail verdict. Only [`CANONICAL_PHRASE`] (after trimming) passes.
#[must_use]
pub fn verify(text: &str) -> VoiceVerdict {
    if text.is_empty() {
        return VoiceVerdict::from_matches(0);
    }
    if transform(text, 33) == VERIFIED {
        VoiceVerdict::from_matches(VOICE_COUNT)
    } else {
        VoiceVerdict::from_matches(0)
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex_lower(&Sha256::digest(bytes))
}

fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        for (i, shift) in [18u32, 12, 6, 0].into_iter().enumerate() {
            if i <= chunk.len() {
                out.push(ALPHABET[((n >> shift) & 0x3f) as usize] as char);
            } else {
                out.push('=');
            }
        }
    }
    out
}

/// JSON string literal with every non-ASCII scalar escaped as `\uXXXX`.
fn ascii_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || !c.is_ascii() => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_ascii_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn consonants_only(t: &str) -> String {
    t.chars()
        .filter(|c| !is_ascii_vowel(c.to_ascii_lowercase()) && !c.is_whitespace())
        .collect()
}

fn rot13(t: &str) -> String {
    t.chars()
        .map(|c| match c {
            'a'..='z' => (((c as u8 - b'a') + 13) % 26 + b'a') as char,
            'A'..='Z' => (((c as u8 - b'A') + 13) % 26 + b'A') as char,
            _ => c,
        })
        .collect()
}

fn char_sum(t: &str) -> u64 {
    t.chars().map(|c| u64::from(u32::from(c))).sum()
}

fn title_case(t: &str) -> String {
    let mut out = String::with_capacity(t.len());
    let mut prev_alpha = false;
    for c in t.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn alternating(t: &str) -> String {
    let mut out = String::with_capacity(t.len());
    for (i, c) in t.chars().enumerate() {
        if i % 2 == 0 {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

fn leet(t: &str) -> String {
    t.chars()
        .map(|c| match c.to_ascii_lowercase() {
            'a' => '4',
            'e' => '3',
            'i' => '1',
            'o' => '0',
            's' => '5',
            't' => '7',
            _ => c,
        })
        .collect()
}

/// Lowercased word n-grams joined by ` | `; the input itself when there are
/// fewer than `n` words.
fn ngrams(t: &str, n: usize) -> String {
    let lower = t.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.len() < n {
        return t.to_string();
    }
    words
        .windows(n)
        .map(|w| w.join(" "))
        .collect::<Vec<_>>()
        .join(" | ")
}
