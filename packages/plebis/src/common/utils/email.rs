//! Email and web address checks with user facing messages.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$").unwrap();
}

/// First problem found in `value`, or `None` when it is acceptable.
/// Blank values are not checked here.
pub fn email_error(value: &str) -> Option<&'static str> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if !value.is_ascii() {
        return Some("no puede contener acentos, eñes u otros caracteres especiales");
    }
    if value.contains("..") {
        return Some("no puede contener dos puntos seguidos");
    }
    if !value.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Some("debe comenzar con un número o una letra");
    }
    if !value.ends_with(|c: char| c.is_ascii_alphabetic()) {
        return Some("debe acabar con una letra");
    }
    if value.contains(',') {
        return Some("contiene caracteres inválidos");
    }
    if !EMAIL.is_match(value) {
        return Some("es incorrecto");
    }
    None
}

/// Absolute http(s) URL with a host.
pub fn is_web_url(value: &str) -> bool {
    match url::Url::parse(value.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_addresses() {
        for ok in [
            "test@example.com",
            "first.last@mail.example.com",
            "user+tag@my-domain.com",
            "1user@example.com",
            "User@Example.Com",
        ] {
            assert_eq!(email_error(ok), None, "{}", ok);
        }
        assert_eq!(email_error("   "), None);
    }

    #[test]
    fn reports_the_first_problem() {
        assert_eq!(
            email_error("usuário@example.com"),
            Some("no puede contener acentos, eñes u otros caracteres especiales")
        );
        assert_eq!(email_error("user..name@example.com"), Some("no puede contener dos puntos seguidos"));
        assert_eq!(email_error(".user@example.com"), Some("debe comenzar con un número o una letra"));
        assert_eq!(email_error("@example.com"), Some("debe comenzar con un número o una letra"));
        assert_eq!(email_error("user@example.com1"), Some("debe acabar con una letra"));
        assert_eq!(email_error("user@"), Some("debe acabar con una letra"));
        assert_eq!(email_error("user,name@example.com"), Some("contiene caracteres inválidos"));
        assert_eq!(email_error("userexample.com"), Some("es incorrecto"));
        assert_eq!(email_error("user@example"), Some("es incorrecto"));
        assert_eq!(email_error("user@.example.com"), Some("es incorrecto"));
        assert_eq!(email_error("user@@example.com"), Some("es incorrecto"));
        assert_eq!(email_error("user name@example.com"), Some("es incorrecto"));
    }

    #[test]
    fn web_urls() {
        assert!(is_web_url("https://plebis.example/legal"));
        assert!(is_web_url("http://example.com"));
        assert!(!is_web_url("ftp://example.com"));
        assert!(!is_web_url("not a url"));
    }
}
