use arrayvec::ArrayVec;

/// An audible cue from a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HornCue {
    Screech,
    Honk,
}

/// Tracks when a vehicle held up by a pedestrian on a green light
/// screeches and honks.
#[derive(Clone, Debug, Default)]
pub(crate) struct Horn {
    screeched: bool,
    honked: bool,
    /// Honks are suppressed until this time.
    quiet_until: f64,
}

impl Horn {
    /// Updates the horn for one tick. `held` is whether the vehicle has a
    /// green light but a pedestrian in front of it.
    pub fn update(&mut self, now: f64, held: bool, interval: f64) -> ArrayVec<HornCue, 2> {
        let mut cues = ArrayVec::new();
        if !held {
            self.screeched = false;
            self.honked = false;
            return cues;
        }
        if !self.screeched {
            self.screeched = true;
            cues.push(HornCue::Screech);
        }
        if !self.honked && now >= self.quiet_until {
            self.honked = true;
            self.quiet_until = now + interval;
            cues.push(HornCue::Honk);
        }
        cues
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn once_per_episode() {
        let mut horn = Horn::default();
        assert_eq!(horn.update(0.0, true, 3.0).as_slice(), &[HornCue::Screech, HornCue::Honk]);
        assert!(horn.update(0.1, true, 3.0).is_empty());
        assert!(horn.update(5.0, true, 3.0).is_empty());
        assert!(horn.update(5.1, false, 3.0).is_empty());
        assert_eq!(horn.update(5.2, true, 3.0).as_slice(), &[HornCue::Screech, HornCue::Honk]);
    }

    #[test]
    fn honk_cooldown_spans_episodes() {
        let mut horn = Horn::default();
        horn.update(0.0, true, 3.0);
        horn.update(1.0, false, 3.0);
        assert_eq!(horn.update(1.5, true, 3.0).as_slice(), &[HornCue::Screech]);
        assert_eq!(horn.update(3.0, true, 3.0).as_slice(), &[HornCue::Honk]);
    }
}
