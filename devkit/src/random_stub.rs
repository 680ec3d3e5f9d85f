/*!
Source aléatoire scriptée

Rejoue une séquence de tirages puis retombe sur une valeur fixe, ce qui
permet de forcer une branche du scheduler (reconnexion, anomalie...).
*/

use fleetsim::rng::RandomSource;
use parking_lot::Mutex;
use std::collections::VecDeque;

pub struct ScriptedRandom {
    script: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedRandom {
    /// Toujours la même valeur.
    pub fn constant(value: f64) -> Self {
        Self::new([], value)
    }

    pub fn new(script: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&self) -> f64 {
        self.script.lock().pop_front().unwrap_or(self.fallback)
    }
}
