//! Simulated participant roster for degraded operation.
//!
//! When the voice infrastructure is unreachable the session stays usable by
//! presenting a plausible but synthetic roster drawn from a fixed callsign
//! pool. The roster never claims to reflect real audio — the session is
//! marked [`SessionMode::Simulated`](crate::voice::SessionMode) and churned
//! on a timer to emulate join/leave activity.

use crate::config::VoiceConfig;
use crate::voice::session::Participant;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

/// Fixed pool of synthetic callsigns.
const CALLSIGN_POOL: &[&str] = &[
    "Granite 3",
    "Kestrel 7",
    "Bluff 12",
    "Harrier 2",
    "Sawtooth 9",
    "Vantage 4",
    "Redline 6",
    "Copper 11",
    "Windrow 5",
    "Basalt 8",
    "Longbow 1",
    "Thicket 10",
];

/// Generate a simulated roster of `sim_roster_min..=sim_roster_max` entries,
/// the first of which is the local participant.
pub(crate) fn simulated_roster<R: Rng + ?Sized>(
    config: &VoiceConfig,
    local: Participant,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<Participant> {
    let min = config.sim_roster_min.max(1);
    let max = config
        .sim_roster_max
        .max(min)
        .min(CALLSIGN_POOL.len() + 1);
    let total = rng.gen_range(min..=max);

    let mut roster = Vec::with_capacity(total);
    roster.push(local);

    let callsigns: Vec<&&str> = CALLSIGN_POOL
        .choose_multiple(rng, total.saturating_sub(1))
        .collect();
    for callsign in callsigns {
        let offset_secs = rng.gen_range(0..=config.sim_join_offset_max_secs.max(0));
        roster.push(Participant {
            identity: format!("sim-{}", callsign.to_lowercase().replace(' ', "-")),
            display_name: (*callsign).to_string(),
            is_local: false,
            is_speaking: rng.gen_bool(config.activity_variance.clamp(0.0, 1.0)),
            is_muted: rng.gen_bool(config.mute_probability.clamp(0.0, 1.0)),
            joined_at: now - chrono::Duration::seconds(offset_secs),
        });
    }
    roster
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn local() -> Participant {
        Participant {
            identity: "op-local".to_owned(),
            display_name: "You".to_owned(),
            is_local: true,
            is_speaking: false,
            is_muted: false,
            joined_at: chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn roster_size_is_within_configured_bounds() {
        let config = VoiceConfig::default();
        let now = local().joined_at;
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let roster = simulated_roster(&config, local(), now, &mut rng);
            assert!(roster.len() >= 2 && roster.len() <= 8, "got {}", roster.len());
        }
    }

    #[test]
    fn local_participant_leads_the_roster() {
        let config = VoiceConfig::default();
        let now = local().joined_at;
        let mut rng = rand::thread_rng();
        let roster = simulated_roster(&config, local(), now, &mut rng);
        assert!(roster[0].is_local);
        assert_eq!(roster.iter().filter(|p| p.is_local).count(), 1);
    }

    #[test]
    fn join_offsets_are_bounded() {
        let config = VoiceConfig::default();
        let now = local().joined_at;
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let roster = simulated_roster(&config, local(), now, &mut rng);
            for participant in roster.iter().skip(1) {
                let offset = now.signed_duration_since(participant.joined_at);
                assert!(offset.num_seconds() >= 0);
                assert!(offset.num_seconds() <= config.sim_join_offset_max_secs);
            }
        }
    }

    #[test]
    fn callsigns_are_unique_within_a_roster() {
        let config = VoiceConfig::default();
        let now = local().joined_at;
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let roster = simulated_roster(&config, local(), now, &mut rng);
            let mut names: Vec<&str> =
                roster.iter().map(|p| p.display_name.as_str()).collect();
            names.sort_unstable();
            let before = names.len();
            names.dedup();
            assert_eq!(names.len(), before, "duplicate callsign in roster");
        }
    }
}
