//! Style resolution: choose the narrative style a prompt is composed with.
//!
//! In automatic mode the prompt is matched against an ordered list of
//! [`StyleProfile`]s and the first profile with a matching keyword wins.
//! In manual mode the current selection is returned unchanged.

use serde::{Deserialize, Serialize};

/// Style used when nothing matches; composes the prompt verbatim.
pub const DEFAULT_STYLE: &str = "Normal";

/// A named style and the keywords that trigger it in automatic mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleProfile {
    /// Style name, matching a template in the template store.
    pub name: String,
    /// Trigger keywords, compared case-insensitively as substrings.
    pub keywords: Vec<String>,
}

impl StyleProfile {
    /// Create a profile from a name and keyword list.
    pub fn new<I, S>(name: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether any keyword occurs in the already lower-cased prompt.
    fn matches(&self, lowered_prompt: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && lowered_prompt.contains(&k.to_lowercase()))
    }
}

/// How the style for a request is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleMode {
    /// Detect from prompt keywords.
    Automatic,
    /// Use the user's explicit selection.
    Manual,
}

impl StyleMode {
    pub fn from_auto_flag(auto: bool) -> Self {
        if auto { Self::Automatic } else { Self::Manual }
    }
}

/// Picks a style name for a prompt.
///
/// Profiles are held in a `Vec` so detection order is exactly the order
/// they were supplied in.
#[derive(Debug, Clone)]
pub struct StyleResolver {
    profiles: Vec<StyleProfile>,
}

impl Default for StyleResolver {
    fn default() -> Self {
        Self::new(default_profiles())
    }
}

impl StyleResolver {
    /// Create a resolver over an ordered profile list.
    pub fn new(profiles: Vec<StyleProfile>) -> Self {
        Self { profiles }
    }

    /// The profiles in evaluation order.
    pub fn profiles(&self) -> &[StyleProfile] {
        &self.profiles
    }

    /// First profile whose keywords match the prompt, or [`DEFAULT_STYLE`].
    pub fn detect(&self, prompt: &str) -> &str {
        let lowered = prompt.to_lowercase();
        self.profiles
            .iter()
            .find(|p| p.matches(&lowered))
            .map_or(DEFAULT_STYLE, |p| p.name.as_str())
    }

    /// Resolve the style for a request.
    ///
    /// Manual mode returns `selection` untouched; persisting it is the
    /// caller's job.
    pub fn resolve<'a>(&'a self, prompt: &str, mode: StyleMode, selection: &'a str) -> &'a str {
        match mode {
            StyleMode::Automatic => self.detect(prompt),
            StyleMode::Manual => selection,
        }
    }
}

/// Built-in keyword table for the narrative styles shipped with the editor.
pub fn default_profiles() -> Vec<StyleProfile> {
    vec![
        StyleProfile::new(
            "Peleas",
            ["pelea", "combate", "golpe", "sangre", "ataque", "lucha", "batalla"],
        ),
        StyleProfile::new(
            "Paisajes",
            [
                "paisaje",
                "lugar",
                "ambiente",
                "cielo",
                "bosque",
                "montaña",
                "descripción",
                "entorno",
            ],
        ),
        StyleProfile::new(
            "Erotismo",
            ["erotico", "sexo", "deseo", "pasión", "cuerpo", "piel", "beso", "íntimo"],
        ),
        StyleProfile::new(
            "Dialogos",
            ["diálogo", "conversación", "hablar", "discusión", "charla"],
        ),
        StyleProfile::new(
            "Humor",
            ["chiste", "gracioso", "humor", "risa", "broma", "sátira", "cómico"],
        ),
        StyleProfile::new(
            "Suspenso",
            ["miedo", "terror", "suspenso", "tensión", "oscuro", "sombra", "peligro"],
        ),
        StyleProfile::new(
            "Romance",
            ["amor", "romance", "corazón", "sentimiento", "pareja", "enamorad"],
        ),
        StyleProfile::new(
            "SciFi",
            ["futuro", "tecnología", "robot", "espacio", "nave", "ciencia ficción", "cyber"],
        ),
        StyleProfile::new(
            "Fantasia",
            ["magia", "dragón", "hechizo", "reino", "espada", "fantasía", "elfo"],
        ),
        StyleProfile::new(
            "Misterio",
            ["misterio", "crimen", "pista", "detective", "asesino", "enigma"],
        ),
        StyleProfile::new(
            "Filosofia",
            ["filosofía", "reflexión", "vida", "muerte", "existencia", "pensamiento"],
        ),
        StyleProfile::new(
            "Historica",
            ["historia", "pasado", "siglo", "época", "antiguo", "medieval"],
        ),
        StyleProfile::new(
            "Lirica",
            ["poema", "poesía", "verso", "lírico", "bello", "hermoso"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn battle_table() -> StyleResolver {
        StyleResolver::new(vec![
            StyleProfile::new("Peleas", ["battle", "fight"]),
            StyleProfile::new("Paisajes", ["forest"]),
        ])
    }

    #[test]
    fn automatic_mode_matches_keyword() {
        let resolver = battle_table();
        let style = resolver.resolve("describe the battle", StyleMode::Automatic, "Normal");
        assert_eq!(style, "Peleas");
    }

    #[test]
    fn automatic_mode_is_case_insensitive() {
        let resolver = battle_table();
        assert_eq!(resolver.detect("The FOREST at dawn"), "Paisajes");
    }

    #[test]
    fn automatic_mode_falls_back_to_default() {
        let resolver = battle_table();
        assert_eq!(resolver.detect("write a letter"), DEFAULT_STYLE);
    }

    #[test]
    fn first_profile_in_order_wins() {
        let resolver = battle_table();
        // Matches both; Peleas is listed first.
        assert_eq!(resolver.detect("a fight in the forest"), "Peleas");

        let reversed = StyleResolver::new(resolver.profiles().iter().rev().cloned().collect());
        assert_eq!(reversed.detect("a fight in the forest"), "Paisajes");
    }

    #[test]
    fn manual_mode_returns_selection_unchanged() {
        let resolver = battle_table();
        let style = resolver.resolve("describe the battle", StyleMode::Manual, "Lirica");
        assert_eq!(style, "Lirica");
    }

    #[test]
    fn default_table_detects_spanish_keywords() {
        let resolver = StyleResolver::default();
        assert_eq!(resolver.detect("Escribe una BATALLA épica"), "Peleas");
        assert_eq!(resolver.detect("un poema sobre el mar"), "Lirica");
        assert_eq!(resolver.detect("hola"), DEFAULT_STYLE);
    }

    #[test]
    fn default_table_order_is_fixed() {
        let profiles = default_profiles();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"Peleas"));
        assert_eq!(names.last(), Some(&"Lirica"));
        assert_eq!(names.len(), 13);
    }

    #[test]
    fn empty_keyword_never_matches() {
        let resolver = StyleResolver::new(vec![StyleProfile::new("Empty", [""])]);
        assert_eq!(resolver.detect("anything"), DEFAULT_STYLE);
    }
}
