//! Proforma invoices: model, totals, numbering and HTML template

use super::escape_html;
use crate::RenderRequest;
use chrono::{DateTime, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Rows shown in the item table even when fewer items are billed
const MIN_TABLE_ROWS: usize = 2;

/// Default GST rate in percent
pub const DEFAULT_GST_RATE: f64 = 18.0;

/// Issuing company, as printed on the letterhead and in the "From" block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub gst_pan: String,
    pub street_address: String,
    pub city: String,
    pub region: String,
    pub postcode: String,
    pub logo: Option<String>,
    pub digital_stamp: Option<String>,
    pub bank_account_number: String,
    pub ifsc_code: String,
    pub account_holder_name: String,
    pub bank_name: String,
}

impl CompanyDetails {
    /// The console's issuing company
    pub fn finsera() -> Self {
        Self {
            name: "Finsera Ventures Private Limited".into(),
            email: "support@finseraa.com".into(),
            phone: "+91 8448998265".into(),
            gst_pan: "AAGCF6398F".into(),
            street_address: "M-1 ARV PARK, office No.402".into(),
            city: "Noida".into(),
            region: "Uttar Pradesh".into(),
            postcode: "Sec-63 201301".into(),
            logo: Some("/logo.png".into()),
            digital_stamp: Some("/digital-stamp.png".into()),
            bank_account_number: "0051590451".into(),
            ifsc_code: "KKBK0005029".into(),
            account_holder_name: "Finsera Ventures Private Limited".into(),
            bank_name: "KOTAK MAHINDRA BANK".into(),
        }
    }
}

/// Billing client
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDetails {
    pub company_name: String,
    pub name: String,
    pub email: String,
    pub street_address: String,
    pub city: String,
    pub region: String,
    pub postcode: String,
    pub gst_number: String,
}

impl ClientDetails {
    /// Single-line postal address: `street, city, region postcode`
    pub fn address(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street_address, self.city, self.region, self.postcode
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvoiceItem {
    pub id: String,
    pub description: String,
    pub quantity: f64,
    pub rate: f64,
    /// `quantity * rate`
    pub amount: f64,
}

impl InvoiceItem {
    pub fn new(id: impl Into<String>, description: impl Into<String>, quantity: f64, rate: f64) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            quantity,
            rate,
            amount: quantity * rate,
        }
    }

    /// A line counts once it has a description, a quantity and a rate
    pub fn is_billable(&self) -> bool {
        !self.description.trim().is_empty() && self.quantity > 0.0 && self.rate > 0.0
    }
}

/// Invoice totals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub subtotal: f64,
    pub gst_amount: f64,
    pub total: f64,
}

/// Subtotal, GST and grand total for `items`.
pub fn calculate_totals(items: &[InvoiceItem], include_gst: bool, gst_rate: f64) -> Totals {
    let subtotal: f64 = items.iter().map(|i| i.amount).sum();
    let gst_amount = if include_gst { subtotal * gst_rate / 100.0 } else { 0.0 };
    Totals {
        subtotal,
        gst_amount,
        total: subtotal + gst_amount,
    }
}

/// Invoice number for the current time
pub fn generate_invoice_number() -> String {
    invoice_number_at(&chrono::Local::now())
}

/// `PI-YYYYMMDD-NNNN`, where `NNNN` are the last four digits of the epoch
/// milliseconds of `now`.
pub fn invoice_number_at<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "PI-{}-{:04}",
        now.format("%Y%m%d"),
        now.timestamp_millis().rem_euclid(10_000)
    )
}

/// `Proforma_Invoice_<number>`
pub fn invoice_filename(invoice_number: &str) -> String {
    format!("Proforma_Invoice_{}", invoice_number)
}

/// Amount with the rupee sign, Indian digit grouping and two decimals
pub fn format_inr(amount: f64) -> String {
    let negative = amount < 0.0;
    let paise = (amount.abs() * 100.0).round() as u64;
    let (rupees, paise) = (paise / 100, paise % 100);

    let digits = rupees.to_string();
    let grouped = if digits.len() <= 3 {
        digits
    } else {
        let (head, last3) = digits.split_at(digits.len() - 3);
        let mut parts: Vec<&str> = Vec::new();
        let mut end = head.len();
        while end > 2 {
            parts.push(&head[end - 2..end]);
            end -= 2;
        }
        parts.push(&head[..end]);
        parts.reverse();
        format!("{},{}", parts.join(","), last3)
    };

    format!("{}₹{}.{:02}", if negative { "-" } else { "" }, grouped, paise)
}

/// A proforma invoice as exchanged with the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    #[serde(default)]
    pub invoice_number: String,
    pub date: NaiveDate,
    #[serde(default = "CompanyDetails::finsera")]
    pub company_details: CompanyDetails,
    #[serde(default)]
    pub client_company_name: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub client_address: String,
    #[serde(default)]
    pub client_gst_number: String,
    #[serde(default)]
    pub items: Vec<InvoiceItem>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default = "default_gst_rate")]
    pub gst_rate: f64,
    #[serde(default)]
    pub gst_amount: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub include_gst: bool,
}

fn default_gst_rate() -> f64 {
    DEFAULT_GST_RATE
}

impl Invoice {
    /// New invoice for `client` with computed amounts and totals
    pub fn new(
        invoice_number: impl Into<String>,
        date: NaiveDate,
        company: CompanyDetails,
        client: &ClientDetails,
        items: Vec<InvoiceItem>,
        include_gst: bool,
        gst_rate: f64,
    ) -> Self {
        let mut invoice = Self {
            invoice_number: invoice_number.into(),
            date,
            company_details: company,
            client_company_name: client.company_name.clone(),
            client_name: client.name.clone(),
            client_email: client.email.clone(),
            client_address: client.address(),
            client_gst_number: client.gst_number.clone(),
            items,
            subtotal: 0.0,
            gst_rate,
            gst_amount: 0.0,
            total: 0.0,
            include_gst,
        };
        invoice.recalculate();
        invoice
    }

    /// Recompute item amounts and totals from quantities and rates
    pub fn recalculate(&mut self) {
        for item in &mut self.items {
            item.amount = item.quantity * item.rate;
        }
        let totals = calculate_totals(&self.items, self.include_gst, self.gst_rate);
        self.subtotal = totals.subtotal;
        self.gst_amount = totals.gst_amount;
        self.total = totals.total;
    }

    pub fn filename(&self) -> String {
        invoice_filename(&self.invoice_number)
    }

    /// Render request for this invoice
    pub fn render_request(&self) -> RenderRequest {
        RenderRequest::html(render_html(self), self.filename())
    }
}

/// Render the invoice template. Every field is HTML-escaped.
pub fn render_html(invoice: &Invoice) -> String {
    let c = &invoice.company_details;
    let e = escape_html;
    let mut html = String::new();

    html.push_str("<div id=\"invoice-preview\">\n");

    // letterhead
    if let Some(logo) = c.logo.as_deref().filter(|l| !l.is_empty()) {
        let _ = writeln!(html, "<img src=\"{}\" alt=\"Logo\" width=\"256\" height=\"128\">", e(logo));
    }
    let _ = writeln!(html, "<p><strong>{}</strong></p>", e(&c.name));
    let _ = writeln!(html, "<p>{}</p>", e(&c.phone));
    let _ = writeln!(html, "<p>{}</p>", e(&c.email));
    let _ = writeln!(
        html,
        "<p>{}, {}, {} {}</p>",
        e(&c.street_address),
        e(&c.city),
        e(&c.region),
        e(&c.postcode)
    );
    html.push_str("<hr>\n<h2>PROFORMA INVOICE</h2>\n");

    let _ = writeln!(html, "<p>Invoice #: {}</p>", e(&invoice.invoice_number));
    let _ = writeln!(html, "<p>Date: {}</p>", invoice.date.format("%d/%m/%Y"));

    html.push_str("<h3>From:</h3>\n");
    let _ = writeln!(html, "<p><strong>{}</strong></p>", e(&c.name));
    let _ = writeln!(html, "<p>{}</p>", e(&c.street_address));
    let _ = writeln!(html, "<p>{}, {} {}</p>", e(&c.city), e(&c.region), e(&c.postcode));
    let _ = writeln!(html, "<p>Phone: {}</p>", e(&c.phone));
    let _ = writeln!(html, "<p>Email: {}</p>", e(&c.email));
    let _ = writeln!(html, "<p>GST/PAN: {}</p>", e(&c.gst_pan));

    html.push_str("<h3>To:</h3>\n");
    let _ = writeln!(html, "<p><strong>{}</strong></p>", e(&invoice.client_company_name));
    let _ = writeln!(html, "<p>{}</p>", e(&invoice.client_name));
    let _ = writeln!(html, "<p>{}</p>", e(&invoice.client_address));
    let _ = writeln!(html, "<p>Email: {}</p>", e(&invoice.client_email));
    if !invoice.client_gst_number.is_empty() {
        let _ = writeln!(html, "<p>GST/PAN: {}</p>", e(&invoice.client_gst_number));
    }

    html.push_str("<table>\n<thead><tr><th>Description</th><th>Quantity</th><th>Rate (₹)</th><th>Amount (₹)</th></tr></thead>\n<tbody>\n");
    for item in &invoice.items {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td></tr>",
            e(&item.description),
            item.quantity,
            item.rate,
            item.amount
        );
    }
    for _ in invoice.items.len()..MIN_TABLE_ROWS {
        html.push_str("<tr><td>&nbsp;</td><td>&nbsp;</td><td>&nbsp;</td><td>&nbsp;</td></tr>\n");
    }
    html.push_str("</tbody>\n</table>\n");

    html.push_str("<h3>Bank Details</h3>\n");
    let _ = writeln!(html, "<p>Bank Account Number: {}</p>", e(&c.bank_account_number));
    let _ = writeln!(html, "<p>IFSC Code: {}</p>", e(&c.ifsc_code));
    let _ = writeln!(html, "<p>Account Holder Name: {}</p>", e(&c.account_holder_name));
    let _ = writeln!(html, "<p>Bank Name: {}</p>", e(&c.bank_name));

    let _ = writeln!(html, "<p>Subtotal: {}</p>", format_inr(invoice.subtotal));
    if invoice.include_gst {
        let _ = writeln!(
            html,
            "<p>GST ({}%): {}</p>",
            invoice.gst_rate,
            format_inr(invoice.gst_amount)
        );
    }
    let _ = writeln!(html, "<p><strong>Total: {}</strong></p>", format_inr(invoice.total));

    if let Some(stamp) = c.digital_stamp.as_deref().filter(|s| !s.is_empty()) {
        let _ = writeln!(html, "<img src=\"{}\" alt=\"Digital Stamp\" width=\"96\" height=\"96\">", e(stamp));
    }
    html.push_str("<p>Authorized Signature</p>\n<hr>\n");
    html.push_str("<p>Thank you for your business!</p>\n");
    html.push_str("<p>This is a computer-generated proforma invoice and does not require a signature.</p>\n");
    html.push_str("</div>\n");

    html
}
