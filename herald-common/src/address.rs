//! Recipient address validation.
//!
//! Intake accepts bare `local-part@domain` mailboxes in the Dot-string form of
//! RFC 5321 section 4.1.2. Quoted strings and address literals are not
//! accepted from API clients.
//!
//! # Size Constraints
//!
//! - Maximum mailbox length: 256 octets
//! - Maximum local-part: 64 octets
//! - Maximum domain: 255 octets

use std::str::FromStr;

/// Result type for address parsing
pub type Result<T> = std::result::Result<T, AddressError>;

/// Errors that can occur during address parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Empty input
    Empty,
    /// Mailbox exceeds 256 octets
    TooLong,
    /// Local-part exceeds 64 octets
    LocalPartTooLong,
    /// Domain exceeds 255 octets
    DomainTooLong,
    /// Missing '@' separator
    MissingAtSign,
    /// Invalid character or structure in local-part
    InvalidLocalPart(String),
    /// Invalid character or structure in domain
    InvalidDomain(String),
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty address"),
            Self::TooLong => write!(f, "Mailbox exceeds 256 octets"),
            Self::LocalPartTooLong => write!(f, "Local-part exceeds 64 octets"),
            Self::DomainTooLong => write!(f, "Domain exceeds 255 octets"),
            Self::MissingAtSign => write!(f, "Missing '@' separator in mailbox"),
            Self::InvalidLocalPart(s) => write!(f, "Invalid local-part: {s}"),
            Self::InvalidDomain(s) => write!(f, "Invalid domain: {s}"),
        }
    }
}

impl std::error::Error for AddressError {}

/// A validated mailbox (local-part@domain)
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Mailbox {
    /// The local part (before @)
    pub local_part: String,
    /// The domain (after @)
    pub domain: String,
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for Mailbox {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self> {
        parse_mailbox(value)
    }
}

const fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

/// Dot-string = Atom *("." Atom)
fn is_dot_string(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && !value.ends_with('.')
        && !value.contains("..")
        && value.chars().all(|c| c == '.' || is_atext(c))
}

/// sub-domain = Let-dig [Ldh-str]
fn is_sub_domain(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Parse a bare mailbox as supplied by an API client.
///
/// Leading and trailing whitespace is ignored.
///
/// # Errors
///
/// Returns `AddressError` if the input is not a valid `local-part@domain`
/// mailbox.
pub fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    if trimmed.len() > 256 {
        return Err(AddressError::TooLong);
    }

    let (local_part, domain) = trimmed.rsplit_once('@').ok_or(AddressError::MissingAtSign)?;

    if local_part.len() > 64 {
        return Err(AddressError::LocalPartTooLong);
    }

    if domain.len() > 255 {
        return Err(AddressError::DomainTooLong);
    }

    if !is_dot_string(local_part) {
        return Err(AddressError::InvalidLocalPart(local_part.to_owned()));
    }

    if !domain.split('.').all(is_sub_domain) {
        return Err(AddressError::InvalidDomain(domain.to_owned()));
    }

    Ok(Mailbox {
        local_part: local_part.to_owned(),
        domain: domain.to_owned(),
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{AddressError, parse_mailbox};

    #[test]
    fn accepts_simple_mailboxes() {
        let mailbox = parse_mailbox("user@example.com").unwrap();

        assert_eq!(mailbox.local_part, "user");
        assert_eq!(mailbox.domain, "example.com");
        assert_eq!(mailbox.to_string(), "user@example.com");
    }

    #[test]
    fn accepts_atext_specials_and_tags() {
        assert!(parse_mailbox("first.last+tag@mail.example.com").is_ok());
        assert!(parse_mailbox("ops_alerts@sub-domain.example.org").is_ok());
        assert!(parse_mailbox("  padded@example.com  ").is_ok());
    }

    #[test]
    fn rejects_structural_errors() {
        assert_eq!(parse_mailbox(""), Err(AddressError::Empty));
        assert_eq!(parse_mailbox("no-at-sign"), Err(AddressError::MissingAtSign));
        assert_eq!(
            parse_mailbox("a..b@example.com"),
            Err(AddressError::InvalidLocalPart("a..b".into()))
        );
        assert_eq!(
            parse_mailbox(".leading@example.com"),
            Err(AddressError::InvalidLocalPart(".leading".into()))
        );
        assert_eq!(
            parse_mailbox("user@-example.com"),
            Err(AddressError::InvalidDomain("-example.com".into()))
        );
        assert_eq!(
            parse_mailbox("user@example..com"),
            Err(AddressError::InvalidDomain("example..com".into()))
        );
    }

    #[test]
    fn rejects_oversize_parts() {
        let local = "a".repeat(65);
        assert_eq!(
            parse_mailbox(&format!("{local}@example.com")),
            Err(AddressError::LocalPartTooLong)
        );

        let mailbox = format!("user@{}", "d".repeat(300));
        assert_eq!(parse_mailbox(&mailbox), Err(AddressError::TooLong));
    }
}
