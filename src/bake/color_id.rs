//! Material-ID colors: random, reproducible from the seed, and at least
//! `min_distance` apart per channel. When no candidate fits after the
//! configured attempts the distance is relaxed by one step and the search
//! continues, down to zero.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::settings::ColorIdSettings;

/// Largest per-channel difference between two colors.
pub fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    (a[0] - b[0])
        .abs()
        .max((a[1] - b[1]).abs())
        .max((a[2] - b[2]).abs())
}

#[derive(Debug, Clone)]
pub struct ColorPalette {
    rng: StdRng,
    min_distance: f32,
    relax_step: f32,
    attempts: u32,
    used: Vec<[f32; 3]>,
}

impl ColorPalette {
    pub fn new(settings: &ColorIdSettings) -> Self {
        Self {
            rng: StdRng::seed_from_u64(settings.seed),
            min_distance: settings.min_distance.max(0.0),
            relax_step: settings.relax_step,
            attempts: settings.attempts_per_step.max(1),
            used: Vec::new(),
        }
    }

    /// Current minimum distance; only ever decreases.
    pub fn min_distance(&self) -> f32 {
        self.min_distance
    }

    pub fn used(&self) -> &[[f32; 3]] {
        &self.used
    }

    pub fn next_color(&mut self) -> [f32; 3] {
        loop {
            for _ in 0..self.attempts {
                let c = [
                    self.rng.gen_range(0.0..1.0),
                    self.rng.gen_range(0.0..1.0),
                    self.rng.gen_range(0.0..1.0),
                ];
                if self.used.iter().all(|u| distance(*u, c) >= self.min_distance) {
                    self.used.push(c);
                    return c;
                }
            }
            let relaxed = if self.relax_step > 0.0 {
                (self.min_distance - self.relax_step).max(0.0)
            } else {
                0.0
            };
            log::debug!(
                "color id palette saturated at distance {:.3}, relaxing to {relaxed:.3}",
                self.min_distance
            );
            self.min_distance = relaxed;
        }
    }
}

/// One color per material name, in the order given. Repeated names keep
/// their first color.
pub fn assign_material_colors<'a>(
    materials: impl IntoIterator<Item = &'a str>,
    settings: &ColorIdSettings,
) -> BTreeMap<String, [f32; 3]> {
    let mut palette = ColorPalette::new(settings);
    let mut out = BTreeMap::new();
    for m in materials {
        if !out.contains_key(m) {
            out.insert(m.to_string(), palette.next_color());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_seed_same_colors() {
        let s = ColorIdSettings::default();
        let a = assign_material_colors(["A", "B", "C"], &s);
        let b = assign_material_colors(["A", "B", "C"], &s);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn saturated_palette_relaxes_to_zero() {
        let s = ColorIdSettings {
            min_distance: 0.9,
            relax_step: 0.3,
            attempts_per_step: 5,
            ..Default::default()
        };
        let mut p = ColorPalette::new(&s);
        let mut last = p.min_distance();
        for _ in 0..64 {
            p.next_color();
            assert!(p.min_distance() <= last);
            last = p.min_distance();
        }
        assert_eq!(p.used().len(), 64);
        assert!(p.min_distance() < 0.9);
    }

    proptest! {
        #[test]
        fn colors_respect_final_distance(seed in any::<u64>(), n in 1usize..40, d in 0.0f32..0.6) {
            let s = ColorIdSettings { seed, min_distance: d, relax_step: 0.1, attempts_per_step: 50 };
            let mut p = ColorPalette::new(&s);
            for _ in 0..n {
                p.next_color();
            }
            let floor = p.min_distance();
            let used = p.used();
            for i in 0..used.len() {
                for j in (i + 1)..used.len() {
                    prop_assert!(distance(used[i], used[j]) >= floor);
                }
            }
        }
    }
}
