//! Experience thresholds and level names.

pub const MAX_LEVEL: i32 = 25;

/// Total XP needed to reach level `index + 1`.
pub const LEVEL_XP: [i32; MAX_LEVEL as usize] = [
    0, 100, 250, 500, 1000, 1500, 2000, 2500, 3000, 3500, 4000, 4500, 5000, 5750, 6500, 7250, 8000,
    8750, 9375, 10_000, 12_000, 14_000, 16_500, 19_000, 22_000,
];

const LEVEL_NAMES: [(i32, &str); 9] = [
    (1, "Novato"),
    (2, "Participante"),
    (3, "Colaborador"),
    (4, "Activista"),
    (5, "Defensor"),
    (10, "Líder Comunitario"),
    (15, "Referente"),
    (20, "Visionario"),
    (25, "Leyenda"),
];

/// XP needed for `level`; `None` outside 1..=25.
pub fn xp_for_level(level: i32) -> Option<i32> {
    if !(1..=MAX_LEVEL).contains(&level) {
        return None;
    }
    Some(LEVEL_XP[(level - 1) as usize])
}

pub fn level_name(level: i32) -> String {
    LEVEL_NAMES
        .iter()
        .find(|(l, _)| *l == level)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Nivel {}", level))
}

/// Highest level reachable with `xp`.
pub fn level_for_xp(xp: i32) -> i32 {
    LEVEL_XP.iter().take_while(|needed| xp >= **needed).count().max(1) as i32
}

/// Bonus for a streak of `days`, paid on every seventh day.
pub fn streak_bonus(days: i32) -> Option<i32> {
    (days > 0 && days % 7 == 0).then(|| days / 7 * 50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_increase() {
        assert!(LEVEL_XP.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(xp_for_level(1), Some(0));
        assert_eq!(xp_for_level(2), Some(100));
        assert_eq!(xp_for_level(20), Some(10_000));
        assert_eq!(xp_for_level(0), None);
        assert_eq!(xp_for_level(26), None);
    }

    #[test]
    fn names_fall_back_to_number() {
        assert_eq!(level_name(1), "Novato");
        assert_eq!(level_name(10), "Líder Comunitario");
        assert_eq!(level_name(20), "Visionario");
        assert_eq!(level_name(7), "Nivel 7");
    }

    #[test]
    fn level_from_xp() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(500), 4);
        assert_eq!(level_for_xp(50_000), MAX_LEVEL);
    }

    #[test]
    fn weekly_streak_bonus() {
        assert_eq!(streak_bonus(7), Some(50));
        assert_eq!(streak_bonus(14), Some(100));
        assert_eq!(streak_bonus(28), Some(200));
        assert_eq!(streak_bonus(6), None);
        assert_eq!(streak_bonus(0), None);
    }
}
