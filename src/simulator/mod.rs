//! Synthetic incident generator.
//!
//! Produces plausible crash incidents around Bangalore for publisher-mode
//! runs and demos. Categorical fields are drawn from cumulative-weight
//! tables with a single uniform draw; the RNG is the only state.

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};

use crate::model::{
    BloodGroup, EmergencyContact, IncidentRecord, Location, VictimInfo, MAX_VICTIM_AGE,
    MIN_VICTIM_AGE,
};

pub const MIN_LATITUDE: f64 = 12.8;
pub const MAX_LATITUDE: f64 = 13.1;
pub const MIN_LONGITUDE: f64 = 77.4;
pub const MAX_LONGITUDE: f64 = 77.8;

const AGE_MEAN: f64 = 35.0;
const AGE_STD_DEV: f64 = 15.0;

const VEHICLE_TYPES: &[(&str, u32)] = &[("car", 70), ("motorcycle", 15), ("truck", 10), ("bus", 5)];

const BLOOD_GROUPS: &[(BloodGroup, u32)] = &[
    (BloodGroup::OPositive, 35),
    (BloodGroup::APositive, 30),
    (BloodGroup::BPositive, 8),
    (BloodGroup::AbPositive, 2),
    (BloodGroup::ONegative, 7),
    (BloodGroup::ANegative, 6),
    (BloodGroup::BNegative, 1),
    (BloodGroup::AbNegative, 1),
];

const ALLERGIES: &[&str] = &[
    "Peanuts", "Shellfish", "Dairy", "Eggs", "Wheat", "Soy", "Tree nuts", "Fish", "Latex",
    "Dust", "Pollen", "Mold",
];

const MEDICATIONS: &[&str] = &[
    "Aspirin",
    "Ibuprofen",
    "Paracetamol",
    "Insulin",
    "Metformin",
    "Amlodipine",
    "Lisinopril",
    "Atorvastatin",
    "Omeprazole",
    "Albuterol",
];

const CONTACT_NAMES: &[&str] = &[
    "John Doe",
    "Jane Smith",
    "Mike Johnson",
    "Sarah Wilson",
    "David Brown",
    "Lisa Davis",
    "Robert Miller",
    "Emily Garcia",
];

const RELATIONSHIPS: &[&str] = &["Spouse", "Parent", "Sibling", "Friend", "Colleague"];

const PHONE_PREFIXES: &[&str] = &["+91-987", "+91-988", "+91-989", "+91-986", "+91-985"];

/// Conditions typical for the victim's age band.
fn conditions_for_age(age: u8) -> &'static [&'static str] {
    match age {
        0..=30 => &["Asthma", "Allergies", "Migraine"],
        31..=50 => &["Hypertension", "Diabetes", "Asthma", "Allergies", "Migraine"],
        51..=70 => &["Hypertension", "Diabetes", "Heart disease", "Arthritis", "Asthma"],
        _ => &["Hypertension", "Diabetes", "Heart disease", "Arthritis", "Dementia"],
    }
}

/// Pick an entry from a cumulative-weight table with one uniform draw.
///
/// Returns `None` if the table is empty or all weights are zero.
pub fn pick_weighted<'a, T, R: Rng + ?Sized>(rng: &mut R, table: &'a [(T, u32)]) -> Option<&'a T> {
    let total: u32 = table.iter().map(|(_, weight)| weight).sum();
    if total == 0 {
        return None;
    }

    let draw = rng.random_range(0..total);
    let mut cumulative = 0;
    for (entry, weight) in table {
        cumulative += weight;
        if draw < cumulative {
            return Some(entry);
        }
    }
    None
}

/// Up to `max` distinct entries of `pool`, in random order.
fn pick_some<R: Rng + ?Sized>(rng: &mut R, pool: &[&str], max: usize) -> Vec<String> {
    let count = rng.random_range(0..=max);
    let mut shuffled = pool.to_vec();
    shuffled.shuffle(rng);
    shuffled
        .into_iter()
        .take(count)
        .map(str::to_string)
        .collect()
}

fn pick_one<R: Rng + ?Sized>(rng: &mut R, pool: &[&str]) -> String {
    pool.choose(rng).copied().unwrap_or_default().to_string()
}

/// Generates random incidents.
pub struct IncidentSimulator<R = StdRng> {
    rng: R,
}

impl IncidentSimulator<StdRng> {
    /// Simulator seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Reproducible simulator.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for IncidentSimulator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> IncidentSimulator<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// A new active incident at a random location inside the city bounds.
    pub fn generate(&mut self) -> IncidentRecord {
        let location = self.location();
        self.generate_at(location)
    }

    /// A new active incident at `location`.
    pub fn generate_at(&mut self, location: Location) -> IncidentRecord {
        let victim = self.victim();
        let vehicle_type = pick_weighted(&mut self.rng, VEHICLE_TYPES)
            .copied()
            .unwrap_or("car");
        IncidentRecord::new(location, victim, vehicle_type)
    }

    pub fn generate_many(&mut self, count: usize) -> Vec<IncidentRecord> {
        (0..count).map(|_| self.generate()).collect()
    }

    fn location(&mut self) -> Location {
        Location::new(
            self.rng.random_range(MIN_LATITUDE..MAX_LATITUDE),
            self.rng.random_range(MIN_LONGITUDE..MAX_LONGITUDE),
        )
    }

    /// Normally distributed age, clamped to the valid victim range.
    fn age(&mut self) -> u8 {
        // Box-Muller; 1 - u keeps the log argument in (0, 1]
        let u1 = 1.0 - self.rng.random::<f64>();
        let u2 = self.rng.random::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        let age = (z * AGE_STD_DEV + AGE_MEAN) as i64;
        age.clamp(i64::from(MIN_VICTIM_AGE), i64::from(MAX_VICTIM_AGE)) as u8
    }

    fn victim(&mut self) -> VictimInfo {
        let age = self.age();
        let rng = &mut self.rng;
        VictimInfo {
            age,
            blood_group: pick_weighted(rng, BLOOD_GROUPS)
                .copied()
                .unwrap_or(BloodGroup::OPositive),
            allergies: pick_some(rng, ALLERGIES, 3),
            medical_conditions: pick_some(rng, conditions_for_age(age), 2),
            medications: pick_some(rng, MEDICATIONS, 2),
            emergency_contact: EmergencyContact {
                name: pick_one(rng, CONTACT_NAMES),
                phone: format!(
                    "{}{:06}",
                    pick_one(rng, PHONE_PREFIXES),
                    rng.random_range(100_000..999_999)
                ),
                relationship: pick_one(rng, RELATIONSHIPS),
            },
        }
    }
}
