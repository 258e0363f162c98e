//! Synthetic reading generator used once a session has replayed everything
//! it captured.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::db::Reading;

/// Device names synthetic readings are attributed to.
pub const DEVICES: [&str; 5] = ["Salon", "Kuchnia", "Sypialnia", "Łazienka", "Biuro"];

pub const MIN_TEMPERATURE: f64 = 15.0;
pub const MAX_TEMPERATURE: f64 = 30.0;

const BACKDATE_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// A plausible reading observed now.
pub fn generate_reading() -> Reading {
    generate_reading_with(&mut rand::thread_rng(), Utc::now())
}

pub fn generate_reading_with<R: Rng + ?Sized>(rng: &mut R, observed_at: DateTime<Utc>) -> Reading {
    let device = DEVICES[rng.gen_range(0..DEVICES.len())];
    let raw = rng.gen_range(MIN_TEMPERATURE..=MAX_TEMPERATURE);
    let value = ((raw * 10.0).round() / 10.0).clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    Reading::new(value, device, observed_at)
}

/// A reading whose timestamp falls somewhere in the seven days before `now`.
pub fn generate_backdated_with<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Reading {
    let offset = rng.gen_range(0..=BACKDATE_WINDOW_SECS);
    generate_reading_with(rng, now - Duration::seconds(offset))
}

pub fn generate_backdated_batch(count: usize) -> Vec<Reading> {
    let mut rng = rand::thread_rng();
    let now = Utc::now();
    (0..count)
        .map(|_| generate_backdated_with(&mut rng, now))
        .collect()
}
