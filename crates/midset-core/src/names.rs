//! Display names for external character and stage ids, and duration
//! formatting.

/// Frames per second of the game simulation.
pub const FRAMES_PER_SECOND: f64 = 60.0;

const CHARACTER_NAMES: [&str; 26] = [
    "Captain Falcon",
    "Donkey Kong",
    "Fox",
    "Mr. Game & Watch",
    "Kirby",
    "Bowser",
    "Link",
    "Luigi",
    "Mario",
    "Marth",
    "Mewtwo",
    "Ness",
    "Peach",
    "Pikachu",
    "Ice Climbers",
    "Jigglypuff",
    "Samus",
    "Yoshi",
    "Zelda",
    "Sheik",
    "Falco",
    "Young Link",
    "Dr. Mario",
    "Roy",
    "Pichu",
    "Ganondorf",
];

const STAGE_NAMES: [&str; 36] = [
    "Unknown Stage",
    "Unknown Stage",
    "Fountain of Dreams",
    "Pokémon Stadium",
    "Princess Peach's Castle",
    "Kongo Jungle",
    "Brinstar",
    "Corneria",
    "Yoshi's Story",
    "Onett",
    "Mute City",
    "Rainbow Cruise",
    "Jungle Japes",
    "Great Bay",
    "Hyrule Temple",
    "Brinstar Depths",
    "Yoshi's Island",
    "Green Greens",
    "Fourside",
    "Mushroom Kingdom I",
    "Mushroom Kingdom II",
    "Unknown Stage",
    "Venom",
    "Poké Floats",
    "Big Blue",
    "Icicle Mountain",
    "Icetop",
    "Flat Zone",
    "Dream Land N64",
    "Yoshi's Island N64",
    "Kongo Jungle N64",
    "Battlefield",
    "Final Destination",
    "Target Test (Mario)",
    "Target Test (Captain Falcon)",
    "Target Test (Young Link)",
];

/// Name for a character id. Unknown or non-numeric ids are returned as
/// given; an absent id is `-`.
pub fn character_name(id: Option<&str>) -> String {
    lookup(&CHARACTER_NAMES, id)
}

/// Name for a stage id, with the same fallbacks as [`character_name`].
pub fn stage_name(id: Option<&str>) -> String {
    lookup(&STAGE_NAMES, id)
}

fn lookup(table: &[&str], id: Option<&str>) -> String {
    let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) else {
        return "-".to_string();
    };
    id.parse::<usize>()
        .ok()
        .and_then(|i| table.get(i))
        .map_or_else(|| id.to_string(), |name| name.to_string())
}

/// Id for a character name, ignoring case.
pub fn character_id(name: &str) -> Option<usize> {
    reverse(&CHARACTER_NAMES, name)
}

/// Id for a stage name, ignoring case. Placeholder entries never match.
pub fn stage_id(name: &str) -> Option<usize> {
    if name.trim().eq_ignore_ascii_case("Unknown Stage") {
        return None;
    }
    reverse(&STAGE_NAMES, name)
}

fn reverse(table: &[&str], name: &str) -> Option<usize> {
    let name = name.trim();
    table.iter().position(|n| n.eq_ignore_ascii_case(name))
}

/// `"2m 30s"`, `"45s"`, or `"0s"` for a frame count at 60 fps.
pub fn format_duration(frames: u32) -> String {
    let seconds = (f64::from(frames) / FRAMES_PER_SECOND).round() as u64;
    let (minutes, rest) = (seconds / 60, seconds % 60);
    if minutes > 0 {
        format!("{}m {}s", minutes, rest)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_names() {
        assert_eq!(character_name(Some("0")), "Captain Falcon");
        assert_eq!(character_name(Some("2")), "Fox");
        assert_eq!(character_name(Some("25")), "Ganondorf");
        assert_eq!(character_name(Some("26")), "26");
        assert_eq!(character_name(Some("sheik")), "sheik");
        assert_eq!(character_name(None), "-");
        assert_eq!(character_name(Some("")), "-");
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(stage_name(Some("31")), "Battlefield");
        assert_eq!(stage_name(Some("32")), "Final Destination");
        assert_eq!(stage_name(Some("21")), "Unknown Stage");
        assert_eq!(stage_name(Some("3")), "Pokémon Stadium");
        assert_eq!(stage_name(Some("99")), "99");
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(character_id("fox"), Some(2));
        assert_eq!(character_id(" Ice Climbers "), Some(14));
        assert_eq!(character_id("Kazuya"), None);
        assert_eq!(stage_id("final destination"), Some(32));
        assert_eq!(stage_id("Unknown Stage"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(2700), "45s");
        assert_eq!(format_duration(9000), "2m 30s");
        assert_eq!(format_duration(3600), "1m 0s");
        assert_eq!(format_duration(29), "0s");
        assert_eq!(format_duration(30), "1s");
    }
}
