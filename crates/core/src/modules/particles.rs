/// Bounded collection that evicts its oldest entries once over capacity.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    items: Vec<T>,
    cap: usize,
}

impl<T> Pool<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            cap,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap;
        self.trim();
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.trim();
    }

    /// Keeps the entries for which `step` returns `true`.
    pub fn retain_mut(&mut self, step: impl FnMut(&mut T) -> bool) {
        self.items.retain_mut(step);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn trim(&mut self) {
        if self.items.len() > self.cap {
            let excess = self.items.len() - self.cap;
            self.items.drain(..excess);
        }
    }
}

impl<T> Extend<T> for Pool<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
        self.trim();
    }
}

impl<'a, T> IntoIterator for &'a Pool<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Why a burst was spawned this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    /// A beat was flagged; always spawns.
    Beat,
    /// Sustained loud bass won the per-frame lottery.
    Shimmer,
}

/// Spawn rule shared by the ripple and particle emitters: every beat spawns
/// a burst, and above `threshold` a smaller burst spawns with probability
/// `bass * chance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstPolicy {
    pub threshold: f32,
    pub chance: f32,
}

impl BurstPolicy {
    pub const fn new(threshold: f32, chance: f32) -> Self {
        Self { threshold, chance }
    }

    pub fn check(&self, beat: bool, bass: f32, rng: &mut fastrand::Rng) -> Option<Burst> {
        if beat {
            Some(Burst::Beat)
        } else if bass > self.threshold && rng.f32() < bass * self.chance {
            Some(Burst::Shimmer)
        } else {
            None
        }
    }
}

/// Expanding ring pulse.
#[derive(Debug, Clone, PartialEq)]
pub struct Ripple {
    pub radius: f32,
    pub speed: f32,
    pub life: f32,
    pub decay: f32,
    pub line_width: f32,
    pub hue: f32,
}

impl Ripple {
    /// Expands one frame; returns `false` once the ripple has faded out.
    pub fn step(&mut self, width_falloff: f32) -> bool {
        self.radius += self.speed;
        self.life -= self.decay;
        self.line_width *= width_falloff;
        self.life > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_evicts_oldest() {
        let mut pool = Pool::new(3);
        for i in 0..5 {
            pool.push(i);
        }
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), [2, 3, 4]);

        pool.extend(5..10);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), [7, 8, 9]);
    }

    #[test]
    fn shrinking_cap_trims() {
        let mut pool = Pool::new(10);
        pool.extend(0..10);
        pool.set_cap(4);
        assert_eq!(pool.iter().copied().collect::<Vec<_>>(), [6, 7, 8, 9]);
    }

    #[test]
    fn beat_always_bursts() {
        let policy = BurstPolicy::new(0.2, 0.12);
        let mut rng = fastrand::Rng::with_seed(1);
        assert_eq!(policy.check(true, 0.0, &mut rng), Some(Burst::Beat));
    }

    #[test]
    fn quiet_bass_never_shimmers() {
        let policy = BurstPolicy::new(0.2, 0.12);
        let mut rng = fastrand::Rng::with_seed(2);
        assert!((0..1000).all(|_| policy.check(false, 0.2, &mut rng).is_none()));
    }

    #[test]
    fn loud_bass_shimmers_sometimes() {
        let policy = BurstPolicy::new(0.2, 0.12);
        let mut rng = fastrand::Rng::with_seed(3);
        let hits = (0..10_000)
            .filter(|_| policy.check(false, 1.0, &mut rng).is_some())
            .count();
        // Expected rate is 12%.
        assert!((900..1500).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn ripple_fades_out() {
        let mut ripple = Ripple {
            radius: 0.0,
            speed: 8.0,
            life: 1.0,
            decay: 0.25,
            line_width: 2.0,
            hue: 0.0,
        };
        let mut frames = 0;
        while ripple.step(0.985) {
            frames += 1;
        }
        assert_eq!(frames, 3);
        assert_eq!(ripple.radius, 32.0);
    }
}
