//! Spanish identity document checks (DNI/NIF, NIE, CIF).

const DNI_LETTERS: &[u8; 23] = b"TRWAGMYFPDXBNJZSQVHLCKE";
const CIF_CONTROL_LETTERS: &[u8; 10] = b"JABCDEFGHI";

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn dni_letter(number: u32) -> char {
    DNI_LETTERS[(number % 23) as usize] as char
}

/// Eight digits followed by the checksum letter (`12345678Z`).
pub fn validate_nif(value: &str) -> bool {
    let value = normalize(value);
    if value.len() != 9 {
        return false;
    }
    let (digits, letter) = value.split_at(8);
    let Ok(number) = digits.parse::<u32>() else {
        return false;
    };
    digits.chars().all(|c| c.is_ascii_digit()) && letter.starts_with(dni_letter(number))
}

/// `X`, `Y` or `Z`, seven digits and the checksum letter (`X1234567L`).
pub fn validate_nie(value: &str) -> bool {
    let value = normalize(value);
    if value.len() != 9 {
        return false;
    }
    let prefix = match value.as_bytes()[0] {
        b'X' => '0',
        b'Y' => '1',
        b'Z' => '2',
        _ => return false,
    };
    validate_nif(&format!("{}{}", prefix, &value[1..]))
}

/// Company tax code: organisation letter, seven digits, control character.
pub fn validate_cif(value: &str) -> bool {
    let value = normalize(value);
    if value.len() != 9 {
        return false;
    }
    let bytes = value.as_bytes();
    let kind = bytes[0];
    if !b"ABCDEFGHJNPQRSUVW".contains(&kind) {
        return false;
    }
    let digits = &value[1..8];
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in digits.chars().enumerate() {
        let d = c.to_digit(10).unwrap_or(0);
        if i % 2 == 0 {
            let doubled = d * 2;
            sum += doubled / 10 + doubled % 10;
        } else {
            sum += d;
        }
    }
    let control_digit = (10 - sum % 10) % 10;
    let control_letter = CIF_CONTROL_LETTERS[control_digit as usize];
    let control = bytes[8];

    match kind {
        b'K' | b'P' | b'Q' | b'S' | b'N' | b'W' => control == control_letter,
        b'A' | b'B' | b'E' | b'H' => control == b'0' + control_digit as u8,
        _ => control == control_letter || control == b'0' + control_digit as u8,
    }
}
