/// Display metadata for one supported language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
    pub flag: &'static str,
    /// Locale handed to the local speech synthesizer for voice selection.
    pub speech_locale: &'static str,
}

pub const DEFAULT_DOCTOR_LANGUAGE: &str = "en";
pub const DEFAULT_PATIENT_LANGUAGE: &str = "hi";

pub const LANGUAGES: &[Language] = &[
    Language { code: "en", name: "English", flag: "🇬🇧", speech_locale: "en-GB" },
    Language { code: "hi", name: "Hindi", flag: "🇮🇳", speech_locale: "hi-IN" },
    Language { code: "es", name: "Spanish", flag: "🇪🇸", speech_locale: "es-ES" },
    Language { code: "fr", name: "French", flag: "🇫🇷", speech_locale: "fr-FR" },
    Language { code: "de", name: "German", flag: "🇩🇪", speech_locale: "de-DE" },
    Language { code: "zh", name: "Chinese", flag: "🇨🇳", speech_locale: "zh-CN" },
    Language { code: "ar", name: "Arabic", flag: "🇸🇦", speech_locale: "ar-SA" },
    Language { code: "pt", name: "Portuguese", flag: "🇧🇷", speech_locale: "pt-BR" },
    Language { code: "ru", name: "Russian", flag: "🇷🇺", speech_locale: "ru-RU" },
    Language { code: "ja", name: "Japanese", flag: "🇯🇵", speech_locale: "ja-JP" },
    Language { code: "ko", name: "Korean", flag: "🇰🇷", speech_locale: "ko-KR" },
    Language { code: "bn", name: "Bengali", flag: "🇧🇩", speech_locale: "bn-BD" },
    Language { code: "ta", name: "Tamil", flag: "🇮🇳", speech_locale: "ta-IN" },
    Language { code: "te", name: "Telugu", flag: "🇮🇳", speech_locale: "te-IN" },
    Language { code: "ur", name: "Urdu", flag: "🇵🇰", speech_locale: "ur-PK" },
    Language { code: "mr", name: "Marathi", flag: "🇮🇳", speech_locale: "mr-IN" },
    Language { code: "gu", name: "Gujarati", flag: "🇮🇳", speech_locale: "gu-IN" },
    Language { code: "kn", name: "Kannada", flag: "🇮🇳", speech_locale: "kn-IN" },
    Language { code: "ml", name: "Malayalam", flag: "🇮🇳", speech_locale: "ml-IN" },
    Language { code: "pa", name: "Punjabi", flag: "🇮🇳", speech_locale: "pa-IN" },
];

pub fn lookup(code: &str) -> Option<&'static Language> {
    let code = code.trim();
    LANGUAGES.iter().find(|l| l.code.eq_ignore_ascii_case(code))
}

pub fn is_supported(code: &str) -> bool {
    lookup(code).is_some()
}

/// Human-readable name, falling back to the raw code for unknown languages.
pub fn display_name(code: &str) -> &str {
    lookup(code).map(|l| l.name).unwrap_or(code)
}

pub fn flag(code: &str) -> &'static str {
    lookup(code).map(|l| l.flag).unwrap_or("🌐")
}

/// Locale for speech synthesis; unknown codes are passed through unchanged,
/// and an empty code falls back to English.
pub fn speech_locale(code: &str) -> &str {
    if code.trim().is_empty() {
        return "en";
    }
    lookup(code).map(|l| l.speech_locale).unwrap_or(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("HI").map(|l| l.name), Some("Hindi"));
        assert_eq!(lookup(" es ").map(|l| l.code), Some("es"));
        assert!(lookup("xx").is_none());
    }

    #[test]
    fn unknown_codes_fall_back_to_the_code() {
        assert_eq!(display_name("tlh"), "tlh");
        assert_eq!(speech_locale("tlh"), "tlh");
        assert_eq!(speech_locale(""), "en");
        assert_eq!(flag("tlh"), "🌐");
    }

    #[test]
    fn defaults_are_registered() {
        assert!(is_supported(DEFAULT_DOCTOR_LANGUAGE));
        assert!(is_supported(DEFAULT_PATIENT_LANGUAGE));
        assert_eq!(LANGUAGES.len(), 20);
    }
}
