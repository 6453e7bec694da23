//! Style Catalog
//!
//! Static list of selectable style names and the selection rules used to pick
//! which styles a generation task requests from the provider.

use rand::seq::SliceRandom;
use rand::Rng;

/// Built-in style names offered to callers
const BUILTIN_STYLES: &[&str] = &[
    "Gothic Dark",
    "Big-head cartoon",
    "Vaporwave",
    "Airbrush Art",
    "Sumi-e / Ink Wash Painting",
    "Linocut / Woodcut",
    "Psychedelic Art",
    "Pre-Raphaelite Brotherhood",
    "Tenebrism / Chiaroscuro",
    "Russian Constructivism",
    "Cyberpunk",
    "Art Nouveau",
    "80's Anime Girl",
    "White Marble Sculpture",
    "Bauhaus Style",
    "Free Interpretation",
    "Multi-color Fluorescent",
    "Jackson Pollock",
    "Double Exposure",
    "Roy Lichtenstein",
    "Fauvism",
    "American Comics",
    "Cel Animation",
    "Ukiyo-e",
    "Takeda Hiromitsu",
    "Flat Color",
    "Black-and-white Anime Line Art",
    "Makoto Shinkai",
    "JoJo's Bizarre Adventure",
    "Studio Ghibli",
];

/// Ordered, duplicate-free list of style names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleCatalog {
    styles: Vec<String>,
}

impl StyleCatalog {
    /// The catalog shipped with the engine
    pub fn builtin() -> Self {
        Self::from_names(BUILTIN_STYLES.iter().copied())
    }

    /// Builds a catalog from arbitrary names; blanks and duplicates are dropped
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            styles: normalize_names(names),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.styles
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub fn contains(&self, style: &str) -> bool {
        self.styles.iter().any(|s| s == style)
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        if !name.is_empty() && !out.iter().any(|s| s == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Picks exactly `count` styles (fewer only when the catalog runs out).
///
/// - No request: `count` distinct catalog entries at random.
/// - Short request: padded with random catalog entries not already requested.
/// - Long request: `count` entries sampled at random from the request.
///
/// Padding always happens before truncation. Requested names are trimmed and
/// de-duplicated; names outside the catalog are kept as free-form styles.
pub fn select_styles<R>(
    requested: &[String],
    count: usize,
    catalog: &StyleCatalog,
    rng: &mut R,
) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let requested = normalize_names(requested);

    let mut selected: Vec<String> = if requested.is_empty() {
        catalog
            .names()
            .choose_multiple(rng, count.min(catalog.len()))
            .cloned()
            .collect()
    } else if requested.len() < count {
        let remaining: Vec<&String> = catalog
            .names()
            .iter()
            .filter(|s| !requested.contains(s))
            .collect();
        let needed = (count - requested.len()).min(remaining.len());
        let mut padded = requested;
        padded.extend(
            remaining
                .choose_multiple(rng, needed)
                .map(|s| (*s).clone()),
        );
        padded
    } else if requested.len() > count {
        requested.choose_multiple(rng, count).cloned().collect()
    } else {
        requested
    };

    selected.truncate(count);
    selected
}

/// Instruction sent to the provider for one style
pub fn prompt_for(style: &str) -> String {
    format!(
        "Keep the composition unchanged and keep every person in exactly the same position \
         (this is very important). Restyle the whole image as {style}, including the faces of \
         the people, so they match the style. The change of style must be very obvious."
    )
}
