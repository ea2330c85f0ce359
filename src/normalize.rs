use std::sync::LazyLock;

use regex::Regex;

static LINKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("valid link pattern"));
static MENTIONS_AND_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[@#]\w+").expect("valid mention pattern"));
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\x{FE0F}\x{200D}\x{1F3FB}-\x{1F3FF}]")
        .expect("valid emoji pattern")
});
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid digit pattern"));
static NON_ARABIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Arabic}\s\x{200C}]").expect("valid script pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid space pattern"));

/// Cleans chat text before it reaches the sentiment model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer {
    /// Drop everything outside the Arabic script (Persian-language models).
    pub arabic_script_only: bool,
}

impl TextNormalizer {
    pub fn new(arabic_script_only: bool) -> Self {
        Self { arabic_script_only }
    }

    pub fn normalize(&self, text: &str) -> String {
        let text = LINKS.replace_all(text, " ");
        let text = MENTIONS_AND_TAGS.replace_all(&text, " ");
        let text = EMOJI.replace_all(&text, "");
        let text = DIGITS.replace_all(&text, "");

        let mut text: String = text
            .chars()
            .filter(|c| *c != '\u{0640}')
            .map(|c| match c {
                '\u{064A}' => '\u{06CC}',
                '\u{0643}' => '\u{06A9}',
                other => other,
            })
            .collect();

        if self.arabic_script_only {
            text = NON_ARABIC.replace_all(&text, "").into_owned();
        }

        WHITESPACE.replace_all(&text, " ").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_links_mentions_tags_and_digits() {
        let normalizer = TextNormalizer::default();
        let cleaned = normalizer.normalize("see https://x.io/a  @bob #news 42 great   day");
        assert_eq!(cleaned, "see great day");
    }

    #[test]
    fn emoji_only_text_normalizes_to_empty() {
        let normalizer = TextNormalizer::default();
        assert_eq!(normalizer.normalize(" 😀👍🏽 ❤️ "), "");
    }

    #[test]
    fn unifies_persian_letters() {
        let normalizer = TextNormalizer::default();
        assert_eq!(normalizer.normalize("كتاب علي"), "کتاب علی");
        assert_eq!(normalizer.normalize("خيـــلی"), "خیلی");
    }

    #[test]
    fn arabic_script_filter_drops_latin() {
        let normalizer = TextNormalizer::new(true);
        assert_eq!(normalizer.normalize("hello سلام world!"), "سلام");
        assert_eq!(normalizer.normalize("only latin"), "");
    }
}
