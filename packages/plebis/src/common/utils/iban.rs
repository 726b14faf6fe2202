//! Bank account (IBAN) checks and BIC lookup for Spanish banks.

/// BIC of the main Spanish banks, by the four digit entity code that
/// follows the IBAN check digits.
const SPANISH_BICS: &[(&str, &str)] = &[
    ("0030", "ESPCESMMXXX"),
    ("0049", "BSCHESMMXXX"),
    ("0075", "POPUESMMXXX"),
    ("0081", "BSABESBBXXX"),
    ("0128", "BKBKESMMXXX"),
    ("0182", "BBVAESMMXXX"),
    ("0487", "GBMNESMMXXX"),
    ("1465", "INGDESMMXXX"),
    ("2038", "CAHMESMMXXX"),
    ("2080", "CAGLESMMXXX"),
    ("2085", "CAZRES2ZXXX"),
    ("2095", "BASKES2BXXX"),
    ("2100", "CAIXESBBXXX"),
    ("3058", "CCRIES2AXXX"),
];

/// Uppercase with spaces removed
pub fn normalize_iban(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

pub fn is_spanish_iban(value: &str) -> bool {
    normalize_iban(value).starts_with("ES")
}

/// Country code, check digits and account, with a valid mod-97 checksum.
pub fn iban_valid(value: &str) -> bool {
    let iban = normalize_iban(value);
    if !(15..=34).contains(&iban.len()) || !iban.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let (head, account) = iban.split_at(4);
    if !head[..2].chars().all(|c| c.is_ascii_alphabetic())
        || !head[2..].chars().all(|c| c.is_ascii_digit())
    {
        return false;
    }
    if head.starts_with("ES") && iban.len() != 24 {
        return false;
    }

    let remainder = account.chars().chain(head.chars()).fold(0u32, |acc, c| {
        let digit = c.to_digit(36).unwrap_or(0);
        if digit >= 10 {
            (acc * 100 + digit) % 97
        } else {
            (acc * 10 + digit) % 97
        }
    });
    remainder == 1
}

/// BIC for a Spanish IBAN whose bank is known.
pub fn spanish_bic(value: &str) -> Option<&'static str> {
    let iban = normalize_iban(value);
    if !iban.starts_with("ES") {
        return None;
    }
    let entity = iban.get(4..8)?;
    SPANISH_BICS
        .iter()
        .find(|(code, _)| *code == entity)
        .map(|(_, bic)| *bic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksums() {
        assert!(iban_valid("ES9121000418450200051332"));
        assert!(iban_valid("es91 2100 0418 4502 0005 1332"));
        assert!(iban_valid("DE89370400440532013000"));
        assert!(!iban_valid("ES9999999999999999999999"));
        assert!(!iban_valid("ES91210004184502000513"));
        assert!(!iban_valid(""));
    }

    #[test]
    fn bic_for_known_spanish_banks() {
        assert_eq!(spanish_bic("ES9121000418450200051332"), Some("CAIXESBBXXX"));
        assert_eq!(spanish_bic("DE89370400440532013000"), None);
        assert!(is_spanish_iban("es9121000418450200051332"));
        assert!(!is_spanish_iban("DE89370400440532013000"));
    }
}
