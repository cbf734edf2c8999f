use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Serial-monitor decoration such as `16:21:54.220 -> `
const PREFIX_NOISE_PATTERN: &str = r"(?m)^[ \t]*\d{1,2}:\d{2}:\d{2}\.\d+[ \t]*->[ \t]*";

static PREFIX_NOISE: OnceLock<Regex> = OnceLock::new();

fn prefix_noise() -> &'static Regex {
    PREFIX_NOISE.get_or_init(|| Regex::new(PREFIX_NOISE_PATTERN).expect("prefix pattern compiles"))
}

/// Removes timestamp-and-arrow decorations at every line start of one chunk.
///
/// Only ever sees a single chunk: a decoration split across two chunks is
/// left in place and ends up as preamble the extractor skips.
pub fn strip_prefix_noise(chunk: &str) -> Cow<'_, str> {
    prefix_noise().replace_all(chunk, "")
}
