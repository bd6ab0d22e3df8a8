//! Booking agreements fetched from the booking backend

use crate::RenderRequest;
use serde::{Deserialize, Deserializer, Serialize};

/// `Booking-Agreement-<booking_id>`
pub fn agreement_filename(booking_id: &str) -> String {
    format!("Booking-Agreement-{}", booking_id)
}

/// Render request for agreement markup returned by the backend
pub fn agreement_request(booking_id: &str, agreement_html: impl Into<String>) -> RenderRequest {
    RenderRequest::html(agreement_html, agreement_filename(booking_id))
}

/// A booking as listed by the backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_name: String,
    pub contact_person: String,
    pub email: String,
    #[serde(deserialize_with = "string_or_number")]
    pub contact_no: String,
    pub bdm: String,
    pub branch_name: String,
    pub state: String,
    pub status: String,
    pub pan: String,
    pub gst: String,
    pub services: Vec<String>,
    pub total_amount: Option<f64>,
}

impl Booking {
    /// Case-insensitive match of `query` against the searchable fields
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        let fields = [
            &self.company_name,
            &self.contact_person,
            &self.email,
            &self.contact_no,
            &self.bdm,
            &self.branch_name,
            &self.state,
            &self.status,
            &self.pan,
            &self.gst,
        ];
        fields
            .iter()
            .copied()
            .chain(self.services.iter())
            .any(|field| field.to_lowercase().contains(&query))
    }
}

// Phone numbers arrive as strings or as bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(feature = "fetch")]
pub use client::AgreementClient;

#[cfg(feature = "fetch")]
mod client {
    use super::Booking;
    use crate::records::Session;
    use crate::{Error, Result};
    use log::{debug, info};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct AgreementResponse {
        agreement_html: Option<String>,
    }

    #[derive(Deserialize)]
    struct BookingsResponse {
        #[serde(rename = "Allbookings")]
        all_bookings: Option<Vec<Booking>>,
    }

    /// Client for the booking backend
    #[derive(Clone)]
    pub struct AgreementClient {
        client: reqwest::Client,
        api_base: String,
    }

    impl AgreementClient {
        pub fn new(api_base: &str) -> Result<Self> {
            let api_base = api_base.trim_end_matches('/').to_string();
            url::Url::parse(&api_base)
                .map_err(|e| Error::ConfigError(format!("invalid api base {}: {}", api_base, e)))?;
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
            Ok(Self { client, api_base })
        }

        pub fn api_base(&self) -> &str {
            &self.api_base
        }

        async fn get_json<T: serde::de::DeserializeOwned>(&self, session: &Session, path: &str) -> Result<T> {
            if session.is_empty() {
                return Err(Error::NetworkError("unauthorized: no session token".into()));
            }

            let url = format!("{}{}", self.api_base, path);
            debug!("GET {}", url);
            let resp = self
                .client
                .get(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", session.token())
                .send()
                .await
                .map_err(|e| Error::NetworkError(format!("GET {} failed: {}", url, e)))?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(Error::NetworkError(format!("unauthorized: GET {} returned 401", url)));
            }
            if !status.is_success() {
                return Err(Error::NetworkError(format!("GET {} returned {}", url, status)));
            }

            resp.json::<T>()
                .await
                .map_err(|e| Error::NetworkError(format!("invalid response from {}: {}", url, e)))
        }

        /// Agreement markup for `booking_id`
        pub async fn fetch_agreement_html(&self, session: &Session, booking_id: &str) -> Result<String> {
            let body: AgreementResponse = self
                .get_json(session, &format!("/generate-agreement/{}", booking_id))
                .await?;
            let html = body
                .agreement_html
                .ok_or_else(|| Error::NetworkError("invalid response: missing agreementHtml".into()))?;
            info!("fetched agreement for booking {} ({} bytes)", booking_id, html.len());
            Ok(html)
        }

        /// Every booking visible to the session
        pub async fn list_bookings(&self, session: &Session) -> Result<Vec<Booking>> {
            let body: BookingsResponse = self.get_json(session, "/booking/all").await?;
            body.all_bookings
                .ok_or_else(|| Error::NetworkError("invalid response: expected an Allbookings array".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_uses_booking_id() {
        assert_eq!(agreement_filename("65a1f0c2"), "Booking-Agreement-65a1f0c2");
        let req = agreement_request("65a1f0c2", "<h1>Agreement</h1>");
        assert_eq!(req.filename, "Booking-Agreement-65a1f0c2");
    }

    #[test]
    fn booking_deserializes_loosely() {
        let json = r#"{
            "_id": "b1",
            "company_name": "Acme",
            "contact_person": "Asha",
            "contact_no": 9876543210,
            "services": ["GST Filing", "Audit"],
            "total_amount": 25000
        }"#;
        let booking: Booking = serde_json::from_str(json).unwrap();
        assert_eq!(booking.id, "b1");
        assert_eq!(booking.contact_no, "9876543210");
        assert_eq!(booking.total_amount, Some(25000.0));
        assert!(booking.status.is_empty());
    }

    #[test]
    fn booking_search() {
        let booking = Booking {
            company_name: "Acme Traders".into(),
            services: vec!["GST Filing".into()],
            ..Default::default()
        };
        assert!(booking.matches("acme"));
        assert!(booking.matches("gst"));
        assert!(booking.matches(""));
        assert!(!booking.matches("zenith"));
    }
}
