//! Language naming resolution.
//!
//! The wire protocol identifies languages by human-readable display name
//! ("English", "Arabic"); providers want locale codes ("en-US", "ar-SA").
//! This module owns the display-name → locale table, the per-locale default
//! voices for synthesis, and the Arabic cross-region quirk: Google TTS only
//! ships Arabic voices under the `ar-XA` locale, so voice selection for any
//! Arabic locale resolves through `ar-XA` even when STT reported `ar-SA`.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Fallback used whenever a display name is not in the table.
pub const DEFAULT_LANGUAGE: &str = "English";
/// Locale paired with [`DEFAULT_LANGUAGE`].
pub const DEFAULT_LOCALE: &str = "en-US";

/// Display name → BCP-47 locale, covering every language a session can
/// declare. Lookup is case-insensitive on the display name.
static LOCALES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("english", "en-US"),
        ("spanish", "es-ES"),
        ("french", "fr-FR"),
        ("german", "de-DE"),
        ("italian", "it-IT"),
        ("portuguese", "pt-BR"),
        ("dutch", "nl-NL"),
        ("russian", "ru-RU"),
        ("polish", "pl-PL"),
        ("turkish", "tr-TR"),
        ("arabic", "ar-SA"),
        ("hindi", "hi-IN"),
        ("japanese", "ja-JP"),
        ("korean", "ko-KR"),
        ("chinese", "cmn-CN"),
        ("vietnamese", "vi-VN"),
        ("indonesian", "id-ID"),
        ("thai", "th-TH"),
        ("ukrainian", "uk-UA"),
    ])
});

/// Default synthesis voice per voice-locale. Locales missing from this table
/// fall back to a base-language match and finally to English.
static DEFAULT_VOICES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en-US", "en-US-Neural2-C"),
        ("es-ES", "es-ES-Neural2-A"),
        ("fr-FR", "fr-FR-Neural2-B"),
        ("de-DE", "de-DE-Neural2-C"),
        ("it-IT", "it-IT-Neural2-A"),
        ("pt-BR", "pt-BR-Neural2-A"),
        ("nl-NL", "nl-NL-Wavenet-B"),
        ("ru-RU", "ru-RU-Wavenet-C"),
        ("pl-PL", "pl-PL-Wavenet-A"),
        ("tr-TR", "tr-TR-Wavenet-A"),
        ("ar-XA", "ar-XA-Wavenet-B"),
        ("hi-IN", "hi-IN-Neural2-A"),
        ("ja-JP", "ja-JP-Neural2-B"),
        ("ko-KR", "ko-KR-Neural2-A"),
        ("cmn-CN", "cmn-CN-Wavenet-A"),
        ("vi-VN", "vi-VN-Neural2-A"),
        ("id-ID", "id-ID-Wavenet-A"),
        ("th-TH", "th-TH-Neural2-C"),
        ("uk-UA", "uk-UA-Wavenet-A"),
    ])
});

/// Resolves a display name to its provider locale code.
///
/// Unknown names resolve to `en-US` rather than failing: a typo in a client
/// payload must never take down the audio path.
pub fn locale_for(display_name: &str) -> &'static str {
    LOCALES
        .get(display_name.trim().to_lowercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_LOCALE)
}

/// Resolves a display name to the locale used for voice selection.
///
/// Identical to [`locale_for`] except for Arabic, which maps to the
/// provider's cross-region `ar-XA` voice family.
pub fn voice_locale_for(display_name: &str) -> &'static str {
    normalize_voice_locale(locale_for(display_name))
}

/// Maps any Arabic locale onto `ar-XA`; other locales pass through.
pub fn normalize_voice_locale(locale: &str) -> &'static str {
    if locale.starts_with("ar-") {
        return "ar-XA";
    }
    // Return the static entry so callers get a 'static str back.
    LOCALES
        .values()
        .find(|l| **l == locale)
        .copied()
        .unwrap_or(DEFAULT_LOCALE)
}

/// Picks a synthesis voice for a voice-locale.
///
/// Selection order: exact locale entry, then any entry sharing the base
/// language, then the English default.
pub fn default_voice_for(voice_locale: &str) -> &'static str {
    if let Some(voice) = DEFAULT_VOICES.get(voice_locale) {
        return voice;
    }

    let base = voice_locale.split('-').next().unwrap_or_default();
    if !base.is_empty() {
        if let Some((_, voice)) = DEFAULT_VOICES
            .iter()
            .find(|(locale, _)| locale.split('-').next() == Some(base))
        {
            return voice;
        }
    }

    DEFAULT_VOICES["en-US"]
}

/// Reverse lookup: locale code → canonical display name. Matches on the
/// full locale first, then on the base language, so `en-GB` still resolves
/// to `English`.
pub fn display_name_for(locale: &str) -> Option<&'static str> {
    fn canonical(key: &str) -> &'static str {
        // Keys are lowercase; display names are capitalized in one place.
        match key {
            "english" => "English",
            "spanish" => "Spanish",
            "french" => "French",
            "german" => "German",
            "italian" => "Italian",
            "portuguese" => "Portuguese",
            "dutch" => "Dutch",
            "russian" => "Russian",
            "polish" => "Polish",
            "turkish" => "Turkish",
            "arabic" => "Arabic",
            "hindi" => "Hindi",
            "japanese" => "Japanese",
            "korean" => "Korean",
            "chinese" => "Chinese",
            "vietnamese" => "Vietnamese",
            "indonesian" => "Indonesian",
            "thai" => "Thai",
            "ukrainian" => "Ukrainian",
            _ => DEFAULT_LANGUAGE,
        }
    }

    if let Some((key, _)) = LOCALES.iter().find(|(_, l)| **l == locale) {
        return Some(canonical(key));
    }

    let base = locale.split('-').next()?;
    LOCALES
        .iter()
        .find(|(_, l)| l.split('-').next() == Some(base))
        .map(|(key, _)| canonical(key))
}

/// True when two display names resolve to the same locale. Used by the
/// translation path to skip provider calls for same-language targets.
pub fn same_language(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim()) || locale_for(a) == locale_for(b)
}
