//! Per-item visual effects.
//!
//! An item may list several effects, but only the first one the compositor
//! recognizes is evaluated per draw. Stacking is deliberately not inferred.

/// Effect type tag as it appears on an item.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    None,
    Glow,
    Noise,
    /// A tag this engine doesn't evaluate. Kept so diagnostics can name it.
    Unknown(String),
}

impl EffectKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "none" | "" => EffectKind::None,
            "glow" | "glow-style" => EffectKind::Glow,
            "noise" | "noise-style" | "glitch" => EffectKind::Noise,
            other => EffectKind::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub kind: EffectKind,
    pub intensity: f32,
    pub range: f32,
}

impl Effect {
    pub fn new(kind: EffectKind, intensity: f32, range: f32) -> Self {
        Self {
            kind,
            intensity,
            range,
        }
    }
}

/// Which pixel transform a draw call evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum EffectSelector {
    #[default]
    PassThrough = 0,
    Glow = 1,
    Noise = 2,
}

/// Selector plus the numeric parameters of the chosen effect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectParams {
    pub selector: EffectSelector,
    pub intensity: f32,
    pub range: f32,
}

impl EffectParams {
    pub const PASS_THROUGH: EffectParams = EffectParams {
        selector: EffectSelector::PassThrough,
        intensity: 0.0,
        range: 0.0,
    };

    /// The first glow or noise effect on the list; pass-through otherwise.
    pub fn pick(effects: &[Effect]) -> EffectParams {
        effects
            .iter()
            .find_map(|effect| {
                let selector = match effect.kind {
                    EffectKind::Glow => EffectSelector::Glow,
                    EffectKind::Noise => EffectSelector::Noise,
                    EffectKind::None | EffectKind::Unknown(_) => return None,
                };
                Some(EffectParams {
                    selector,
                    intensity: effect.intensity,
                    range: effect.range,
                })
            })
            .unwrap_or(EffectParams::PASS_THROUGH)
    }
}
