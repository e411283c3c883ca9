//! Lazy numeric sequences used as a probe's scheduled send delay.
//!
//! Grounded on `libparistraceroute/generator.c` and its sole concrete
//! instance, `generators/uniform.c`: a generator is a named parameter
//! table plus a `next_value` step. The crate keeps the same shape but
//! only ships the uniform generator the original shipped; algorithms
//! needing other distributions can still set a probe's delay to a plain
//! scalar (`Generator::Fixed`).

#[derive(Debug, Clone, PartialEq)]
pub enum Generator {
    /// A constant delay in seconds, returned verbatim every call.
    Fixed(f64),
    /// Uniformly distributed delay in `[min, max)` seconds, grounded on
    /// `generators/uniform.c`'s `{min, max}` field table.
    Uniform { min: f64, max: f64 },
}

impl Generator {
    pub fn uniform(min: f64, max: f64) -> Self {
        Generator::Uniform { min, max }
    }

    /// Advance the generator and return the next delay in seconds.
    pub fn next_value(&self) -> f64 {
        match self {
            Generator::Fixed(v) => *v,
            Generator::Uniform { min, max } => {
                if max <= min {
                    *min
                } else {
                    rand::Rng::gen_range(&mut rand::thread_rng(), *min..*max)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_generator_is_verbatim() {
        let g = Generator::Fixed(1.5);
        assert_eq!(g.next_value(), 1.5);
        assert_eq!(g.next_value(), 1.5);
    }

    #[test]
    fn uniform_generator_stays_in_range() {
        let g = Generator::uniform(0.1, 0.2);
        for _ in 0..100 {
            let v = g.next_value();
            assert!((0.1..0.2).contains(&v));
        }
    }

    #[test]
    fn uniform_generator_degenerate_range_returns_min() {
        let g = Generator::uniform(0.5, 0.5);
        assert_eq!(g.next_value(), 0.5);
    }
}
