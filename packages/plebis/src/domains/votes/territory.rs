//! Spanish territorial codes.
//!
//! Towns are stored as `m_PP_TTT_C` (province, town, control digit).
//! Autonomous communities use the INE numbering `c_01` .. `c_19`.

/// `(autonomy code, autonomy name, province codes)`
pub const AUTONOMIES: &[(&str, &str, &[&str])] = &[
    ("c_01", "Andalucía", &["04", "11", "14", "18", "21", "23", "29", "41"]),
    ("c_02", "Aragón", &["22", "44", "50"]),
    ("c_03", "Asturias", &["33"]),
    ("c_04", "Baleares", &["07"]),
    ("c_05", "Canarias", &["35", "38"]),
    ("c_06", "Cantabria", &["39"]),
    (
        "c_07",
        "Castilla y León",
        &["05", "09", "24", "34", "37", "40", "42", "47", "49"],
    ),
    ("c_08", "Castilla-La Mancha", &["02", "13", "16", "19", "45"]),
    ("c_09", "Cataluña", &["08", "17", "25", "43"]),
    ("c_10", "Comunidad Valenciana", &["03", "12", "46"]),
    ("c_11", "Extremadura", &["06", "10"]),
    ("c_12", "Galicia", &["15", "27", "32", "36"]),
    ("c_13", "Comunidad de Madrid", &["28"]),
    ("c_14", "Región de Murcia", &["30"]),
    ("c_15", "Comunidad Foral de Navarra", &["31"]),
    ("c_16", "País Vasco", &["01", "20", "48"]),
    ("c_17", "La Rioja", &["26"]),
    ("c_18", "Ceuta", &["51"]),
    ("c_19", "Melilla", &["52"]),
];

/// Autonomy code (`c_09`) for a two digit province code.
pub fn autonomy_for_province(province: &str) -> Option<&'static str> {
    AUTONOMIES
        .iter()
        .find(|(_, _, provinces)| provinces.contains(&province))
        .map(|(code, _, _)| *code)
}

pub fn autonomy_name(code: &str) -> Option<&'static str> {
    AUTONOMIES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, _)| *name)
}

/// A parsed town code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TownCode {
    pub province: String,
    pub town: String,
    pub control: Option<String>,
}

impl TownCode {
    /// Accepts `m_08_079_6`, `m_08_079` and the bare `08079` form.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if let Some(rest) = code.strip_prefix("m_") {
            let mut parts = rest.split('_');
            let province = parts.next()?;
            let town = parts.next()?;
            let control = parts.next().map(str::to_string);
            if province.len() != 2 || town.len() != 3 {
                return None;
            }
            if !province.chars().chain(town.chars()).all(|c| c.is_ascii_digit()) {
                return None;
            }
            return Some(Self {
                province: province.to_string(),
                town: town.to_string(),
                control,
            });
        }

        if code.len() == 5 && code.chars().all(|c| c.is_ascii_digit()) {
            return Some(Self {
                province: code[..2].to_string(),
                town: code[2..].to_string(),
                control: None,
            });
        }

        None
    }

    pub fn autonomy(&self) -> Option<&'static str> {
        autonomy_for_province(&self.province)
    }

    /// Province, town and control digits joined (`080796`).
    pub fn numeric(&self) -> String {
        format!(
            "{}{}{}",
            self.province,
            self.town,
            self.control.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provinces_map_to_autonomies() {
        assert_eq!(autonomy_for_province("08"), Some("c_09"));
        assert_eq!(autonomy_for_province("28"), Some("c_13"));
        assert_eq!(autonomy_for_province("38"), Some("c_05"));
        assert_eq!(autonomy_for_province("99"), None);
    }

    #[test]
    fn every_province_belongs_to_one_autonomy() {
        let total: usize = AUTONOMIES.iter().map(|(_, _, p)| p.len()).sum();
        assert_eq!(total, 52);
    }

    #[test]
    fn autonomy_names() {
        assert_eq!(autonomy_name("c_09"), Some("Cataluña"));
        assert_eq!(autonomy_name("c_99"), None);
    }

    #[test]
    fn parses_town_codes() {
        let town = TownCode::parse("m_08_079_6").unwrap();
        assert_eq!(town.province, "08");
        assert_eq!(town.town, "079");
        assert_eq!(town.numeric(), "080796");
        assert_eq!(town.autonomy(), Some("c_09"));

        let bare = TownCode::parse("28079").unwrap();
        assert_eq!(bare.numeric(), "28079");
        assert_eq!(bare.autonomy(), Some("c_13"));

        assert!(TownCode::parse("m_8_79").is_none());
        assert!(TownCode::parse("madrid").is_none());
    }
}
