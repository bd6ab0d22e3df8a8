//! Business documents rendered through the generator
//!
//! Proforma invoices are rendered locally from a template; booking
//! agreements are fetched as ready-made HTML from the booking backend.

pub mod agreement;
pub mod invoice;

pub use agreement::{agreement_filename, Booking};
#[cfg(feature = "fetch")]
pub use agreement::AgreementClient;
pub use invoice::{ClientDetails, CompanyDetails, Invoice, InvoiceItem};

/// Authenticated console session
///
/// Always passed explicitly by the caller; nothing is read from ambient
/// storage.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_empty(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("token", &"<redacted>").finish()
    }
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn session_debug_hides_token() {
        let session = Session::new("secret-token");
        assert_eq!(session.token(), "secret-token");
        assert!(!format!("{:?}", session).contains("secret"));
        assert!(Session::new("  ").is_empty());
    }
}
